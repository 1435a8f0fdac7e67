use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::{get, post, put},
};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use application::{
    ApplicationError, FacetService, IndexingService, MapperService, MappingService, StatisticalFacetRequest,
    StatsService,
};
use domain::{DocumentMapperParser, MapperError};
use infrastructure::{InMemoryFieldDataCache, InMemoryIndex, InMemoryMappingRepository};

#[derive(Clone)]
struct AppState {
    mapping_service: Arc<MappingService>,
    indexing_service: Arc<IndexingService>,
    facet_service: Arc<FacetService>,
    stats_service: Arc<StatsService>,
}

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_INDEX_NAME: &str = "default";
const DEFAULT_SEGMENT_MAX_DOCS: usize = 1000;

/// Reads `name` from the environment, falling back to `default` when it is
/// unset or does not parse.
fn env_or<T: FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match T::from_str(&raw) {
            Ok(value) => {
                info!("Using {} = {} from environment.", name, value);
                value
            }
            Err(_) => {
                warn!(
                    "Invalid {} value '{}' in environment variable. Using default {}.",
                    name, raw, default
                );
                default
            }
        },
        Err(_) => {
            info!("{} environment variable not set. Using default {}.", name, default);
            default
        }
    }
}

#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    // --- Configuration ---
    let port = env_or("PORT", DEFAULT_PORT);
    let index_name = env_or("INDEX_NAME", DEFAULT_INDEX_NAME.to_string());
    let segment_max_docs = env_or("SEGMENT_MAX_DOCS", DEFAULT_SEGMENT_MAX_DOCS);

    // --- Dependency Injection ---
    let mapping_repository = Arc::new(InMemoryMappingRepository::new());
    let index = Arc::new(InMemoryIndex::new(segment_max_docs));
    let field_data_cache = Arc::new(InMemoryFieldDataCache::new());
    let mapper_service = Arc::new(MapperService::new(DocumentMapperParser::new(index_name.as_str())));
    info!(index = %index_name, "In-memory infrastructure components initialized.");

    let mapping_service = Arc::new(MappingService::new(mapper_service.clone(), mapping_repository.clone()));
    let indexing_service = Arc::new(IndexingService::new(
        mapper_service.clone(),
        mapping_repository.clone(),
        index.clone(),
    ));
    let facet_service = Arc::new(FacetService::new(mapper_service.clone(), index.clone(), field_data_cache));
    let stats_service = Arc::new(StatsService::new(mapper_service, index));

    if let Err(e) = mapping_service.restore().await {
        error!("Failed to restore stored mappings: {}", e);
        std::process::exit(1);
    }
    info!("Application services initialized.");

    let app_state = AppState {
        mapping_service,
        indexing_service,
        facet_service,
        stats_service,
    };

    // --- API Router Definition ---
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats_handler))
        .route("/_mapping", get(list_types_handler))
        .route("/_refresh", post(refresh_handler))
        .route("/_facets/statistical", post(statistical_facet_handler))
        .route("/:doc_type/_mapping", put(put_mapping_handler).get(get_mapping_handler))
        .route("/:doc_type", post(index_document_handler))
        .route("/:doc_type/:id", put(index_document_with_id_handler))
        .with_state(app_state);
    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    info!("Health check endpoint called");
    (StatusCode::OK, "OK")
}

// --- Mapping Handlers ---

/// PUT /:doc_type/_mapping with the mapping definition as the body.
async fn put_mapping_handler(
    State(state): State<AppState>,
    Path(doc_type): Path<String>,
    body: String,
) -> Response {
    info!(doc_type = %doc_type, "Received request to put mapping");
    match state.mapping_service.put_mapping(&doc_type, &body).await {
        Ok(response) if response.acknowledged => (StatusCode::OK, JsonResponse(response)).into_response(),
        // Merge conflicts leave the mapping untouched.
        Ok(response) => (StatusCode::CONFLICT, JsonResponse(response)).into_response(),
        Err(e) => {
            error!(doc_type = %doc_type, "Failed to put mapping via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

async fn get_mapping_handler(State(state): State<AppState>, Path(doc_type): Path<String>) -> Response {
    match state.mapping_service.get_mapping(&doc_type).await {
        Ok(response) => (StatusCode::OK, JsonResponse(response.mapping)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

async fn list_types_handler(State(state): State<AppState>) -> Response {
    (StatusCode::OK, JsonResponse(state.mapping_service.list_types())).into_response()
}

// --- Document Handlers ---

/// POST /:doc_type, the id comes from the body or is generated.
async fn index_document_handler(
    State(state): State<AppState>,
    Path(doc_type): Path<String>,
    body: Bytes,
) -> Response {
    index_document(state, doc_type, None, body).await
}

/// PUT /:doc_type/:id
async fn index_document_with_id_handler(
    State(state): State<AppState>,
    Path((doc_type, id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    index_document(state, doc_type, Some(id), body).await
}

async fn index_document(state: AppState, doc_type: String, id: Option<String>, body: Bytes) -> Response {
    info!(doc_type = %doc_type, doc_id = ?id, "Received request to index document");
    match state
        .indexing_service
        .index_document(&doc_type, id.as_deref(), &body)
        .await
    {
        Ok(response) => (StatusCode::CREATED, JsonResponse(response)).into_response(),
        Err(e) => {
            error!(doc_type = %doc_type, "Failed to index document via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

async fn refresh_handler(State(state): State<AppState>) -> Response {
    match state.indexing_service.refresh().await {
        Ok(()) => (StatusCode::OK, "Refreshed").into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

// --- Facet & Stats Handlers ---

async fn statistical_facet_handler(
    State(state): State<AppState>,
    Json(request): Json<StatisticalFacetRequest>,
) -> Response {
    info!(field = %request.field, "Received statistical facet request");
    match state.facet_service.statistical(request).await {
        Ok(facet) => (StatusCode::OK, JsonResponse(facet)).into_response(),
        Err(e) => {
            error!("Failed to compute statistical facet via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

async fn get_stats_handler(State(state): State<AppState>) -> Response {
    info!("Received request to get statistics");
    match state.stats_service.get_stats().await {
        Ok(stats) => (StatusCode::OK, JsonResponse(stats)).into_response(),
        Err(e) => {
            error!("Failed to get statistics via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Maps ApplicationError to an HTTP status code and response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, body) = match err {
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::MappingNotFound(doc_type) => (
            StatusCode::NOT_FOUND,
            format!("No mapping found for type '{}'", doc_type),
        ),
        ApplicationError::UnknownField(field) => (
            StatusCode::NOT_FOUND,
            format!("No field mapping found for '{}'", field),
        ),
        err @ ApplicationError::NonNumericField { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        ApplicationError::Mapper(MapperError::SourceGeneration(msg)) => {
            error!("Mapping source generation failed: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
        ApplicationError::Mapper(mapper_err) => {
            warn!("Mapping or document rejected: {}", mapper_err);
            (StatusCode::BAD_REQUEST, mapper_err.to_string())
        }
        ApplicationError::FieldData { field, reason } => {
            error!(field = %field, "Field data error: {}", reason);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load field data for '{}'", field),
            )
        }
        ApplicationError::InfrastructureError(msg) => {
            error!("Underlying infrastructure error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    (status, body).into_response()
}
