use async_trait::async_trait;
use domain::{MapperError, ParsedDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

pub mod facet;
pub mod field_data;
pub mod mapper_service;

pub use facet::{StatisticalFacet, StatisticalFacetCollector, StatsProc};
pub use field_data::{DocId, FieldDataCache, NumericFieldData, SegmentReader};
pub use mapper_service::{MapperService, SmartNameFieldMappers};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("No mapping found for type: {0}")]
    MappingNotFound(String),
    #[error("No field mapping found for: {0}")]
    UnknownField(String),
    #[error("Field '{field}' of type [{field_type}] has no numeric field data")]
    NonNumericField { field: String, field_type: String },
    #[error("Failed to load field data for '{field}': {reason}")]
    FieldData { field: String, reason: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),
    #[error("Mapping error: {0}")]
    Mapper(#[from] MapperError), // Propagate mapper errors cleanly
}

// --- Infrastructure Interfaces (Traits) ---

/// Interface for storing mapping definitions, one per type.
#[async_trait]
pub trait MappingRepository: Send + Sync {
    /// Saves (creates or replaces) the definition of a type.
    async fn save(&self, doc_type: &str, source: &str) -> Result<(), ApplicationError>;
    async fn get(&self, doc_type: &str) -> Result<Option<String>, ApplicationError>;
    /// Lists the types with a stored definition.
    async fn list(&self) -> Result<Vec<String>, ApplicationError>;
}

/// Interface for the index that receives parsed documents.
///
/// Added documents become visible to [`IndexSink::segments`] only after a
/// refresh seals them into a segment.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn add(&self, document: ParsedDocument) -> Result<(), ApplicationError>;
    /// Seals pending documents into a searchable segment.
    async fn refresh(&self) -> Result<(), ApplicationError>;
    async fn segments(&self) -> Result<Vec<Arc<dyn SegmentReader>>, ApplicationError>;
    /// Documents added so far, sealed or not.
    async fn doc_count(&self) -> Result<usize, ApplicationError>;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

#[derive(Serialize, Debug)]
pub struct PutMappingResponse {
    pub doc_type: String,
    /// False when the definition conflicted with the current mapping.
    pub acknowledged: bool,
    pub conflicts: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct MappingResponse {
    pub doc_type: String,
    pub mapping: Value,
}

#[derive(Serialize, Debug)]
pub struct IndexDocumentResponse {
    pub uid: String,
    pub id: String,
    pub doc_type: String,
    /// Fields this document added to the mapping.
    pub fields_added: Vec<String>,
    pub processing_time_ms: u128,
}

#[derive(Deserialize, Debug)]
pub struct StatisticalFacetRequest {
    #[serde(default = "default_facet_name")]
    pub name: String,
    /// Field name, optionally qualified with its type (`tweet.likes`).
    pub field: String,
}

fn default_facet_name() -> String {
    "stats".to_string()
}

/// Statistical facet plus its derived values. Undefined values (min of an
/// empty facet, mean of nothing) are serialized as `null`.
#[derive(Serialize, Debug)]
pub struct StatisticalFacetResponse {
    pub name: String,
    pub field: String,
    pub count: u64,
    pub total: f64,
    pub sum_of_squares: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_deviation: f64,
}

impl From<StatisticalFacet> for StatisticalFacetResponse {
    fn from(facet: StatisticalFacet) -> Self {
        Self {
            mean: facet.mean(),
            variance: facet.variance(),
            std_deviation: facet.std_deviation(),
            count: facet.count,
            total: facet.total,
            sum_of_squares: facet.sum_of_squares,
            min: facet.min,
            max: facet.max,
            name: facet.name,
            field: facet.field_name,
        }
    }
}

/// Response for the /stats endpoint.
#[derive(Serialize, Debug)]
pub struct EngineStats {
    pub index: String,
    pub types: Vec<String>,
    pub total_documents: usize,
    pub segments: usize,
}

// --- Application Services (Use Cases) ---

fn validate_type(doc_type: &str) -> Result<(), ApplicationError> {
    if doc_type.is_empty() || doc_type.starts_with('_') || doc_type.contains('.') {
        return Err(ApplicationError::InvalidInput(format!(
            "invalid type name [{doc_type}]: must be non-empty, must not start with '_' or contain '.'"
        )));
    }
    Ok(())
}

/// Service for managing type mappings.
pub struct MappingService {
    mapper_service: Arc<MapperService>,
    mapping_repo: Arc<dyn MappingRepository>,
}

impl MappingService {
    pub fn new(mapper_service: Arc<MapperService>, mapping_repo: Arc<dyn MappingRepository>) -> Self {
        Self {
            mapper_service,
            mapping_repo,
        }
    }

    /// Loads every stored definition into the mapper service.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize, ApplicationError> {
        let types = self.mapping_repo.list().await?;
        for doc_type in &types {
            let Some(source) = self.mapping_repo.get(doc_type).await? else {
                warn!(doc_type = %doc_type, "Listed mapping disappeared before it could be restored");
                continue;
            };
            self.mapper_service.put_mapping(doc_type, &source)?;
        }
        info!(count = types.len(), "Restored mappings");
        Ok(types.len())
    }

    #[instrument(skip(self, source))]
    pub async fn put_mapping(&self, doc_type: &str, source: &str) -> Result<PutMappingResponse, ApplicationError> {
        info!(doc_type = %doc_type, "Attempting to put mapping");
        validate_type(doc_type)?;

        let result = self.mapper_service.put_mapping(doc_type, source)?;
        if result.has_conflicts() {
            warn!(doc_type = %doc_type, conflicts = ?result.conflicts(), "Mapping rejected");
            return Ok(PutMappingResponse {
                doc_type: doc_type.to_string(),
                acknowledged: false,
                conflicts: result.conflicts().to_vec(),
            });
        }

        let mapper = self
            .mapper_service
            .document_mapper(doc_type)
            .ok_or_else(|| ApplicationError::MappingNotFound(doc_type.to_string()))?;
        self.mapping_repo
            .save(doc_type, &mapper.mapping_source())
            .await
            .map_err(|e| {
                error!(doc_type = %doc_type, "Failed to save mapping definition: {}", e);
                ApplicationError::InfrastructureError(format!("Failed to save mapping: {}", e))
            })?;
        info!(doc_type = %doc_type, "Mapping saved successfully");

        Ok(PutMappingResponse {
            doc_type: doc_type.to_string(),
            acknowledged: true,
            conflicts: Vec::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_mapping(&self, doc_type: &str) -> Result<MappingResponse, ApplicationError> {
        let mapper = self.mapper_service.document_mapper(doc_type).ok_or_else(|| {
            warn!(doc_type = %doc_type, "Mapping not found");
            ApplicationError::MappingNotFound(doc_type.to_string())
        })?;
        let mapping = serde_json::from_str(&mapper.mapping_source())
            .map_err(|e| MapperError::SourceGeneration(e.to_string()))?;
        Ok(MappingResponse {
            doc_type: doc_type.to_string(),
            mapping,
        })
    }

    pub fn list_types(&self) -> Vec<String> {
        self.mapper_service.types()
    }
}

/// Service responsible for document indexing.
pub struct IndexingService {
    mapper_service: Arc<MapperService>,
    mapping_repo: Arc<dyn MappingRepository>,
    sink: Arc<dyn IndexSink>,
}

impl IndexingService {
    pub fn new(
        mapper_service: Arc<MapperService>,
        mapping_repo: Arc<dyn MappingRepository>,
        sink: Arc<dyn IndexSink>,
    ) -> Self {
        Self {
            mapper_service,
            mapping_repo,
            sink,
        }
    }

    /// Parses `source` against the mapping of `doc_type` (created on first
    /// use) and hands the result to the index. Mappings grown by the
    /// document are persisted.
    #[instrument(skip(self, source), fields(doc_type = %doc_type, doc_id = ?id))]
    pub async fn index_document(
        &self,
        doc_type: &str,
        id: Option<&str>,
        source: &[u8],
    ) -> Result<IndexDocumentResponse, ApplicationError> {
        let start_time = Instant::now();
        validate_type(doc_type)?;
        let mapper = self.mapper_service.document_mapper_with_auto_create(doc_type)?;

        let parsed = mapper.parse(Some(doc_type), id, source)?;
        let fields_added: Vec<String> = parsed
            .mappers_added
            .iter()
            .map(|mapper| mapper.full_name().to_string())
            .collect();
        debug!(uid = %parsed.uid, fields = parsed.doc.fields().len(), added = fields_added.len(), "Document parsed");

        if !fields_added.is_empty() {
            if let Err(e) = self.mapping_repo.save(doc_type, &mapper.mapping_source()).await {
                error!(doc_type = %doc_type, "Failed to save grown mapping: {}", e);
                return Err(ApplicationError::InfrastructureError(format!(
                    "Mapping save failed: {}",
                    e
                )));
            }
        }

        let (uid, doc_id) = (parsed.uid.clone(), parsed.id.clone());
        if let Err(e) = self.sink.add(parsed).await {
            error!(uid = %uid, "Failed to index document: {}", e);
            return Err(e);
        }
        info!(uid = %uid, "Document indexed successfully");

        Ok(IndexDocumentResponse {
            uid,
            id: doc_id,
            doc_type: doc_type.to_string(),
            fields_added,
            processing_time_ms: start_time.elapsed().as_millis(),
        })
    }

    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), ApplicationError> {
        self.sink.refresh().await
    }
}

/// Service computing facets over the searchable segments.
pub struct FacetService {
    mapper_service: Arc<MapperService>,
    sink: Arc<dyn IndexSink>,
    cache: Arc<dyn FieldDataCache>,
}

impl FacetService {
    pub fn new(mapper_service: Arc<MapperService>, sink: Arc<dyn IndexSink>, cache: Arc<dyn FieldDataCache>) -> Self {
        Self {
            mapper_service,
            sink,
            cache,
        }
    }

    #[instrument(skip(self, request), fields(facet = %request.name, field = %request.field))]
    pub async fn statistical(
        &self,
        request: StatisticalFacetRequest,
    ) -> Result<StatisticalFacetResponse, ApplicationError> {
        let start_time = Instant::now();
        let mut collector = StatisticalFacetCollector::new(
            request.name.as_str(),
            &request.field,
            &self.mapper_service,
            self.cache.clone(),
        )?;
        let segments = self.sink.segments().await?;
        for segment in &segments {
            collector.set_next_reader(segment.clone())?;
            collector.collect_all();
        }
        let facet = collector.facet();
        info!(
            segments = segments.len(),
            count = facet.count,
            time_ms = start_time.elapsed().as_millis(),
            "Statistical facet computed"
        );
        Ok(facet.into())
    }
}

pub struct StatsService {
    mapper_service: Arc<MapperService>,
    sink: Arc<dyn IndexSink>,
}

impl StatsService {
    pub fn new(mapper_service: Arc<MapperService>, sink: Arc<dyn IndexSink>) -> Self {
        Self { mapper_service, sink }
    }

    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<EngineStats, ApplicationError> {
        let (documents, segments) = tokio::join!(self.sink.doc_count(), self.sink.segments());
        let total_documents = documents.map_err(|e| {
            error!("Failed to get total document count for stats: {}", e);
            ApplicationError::InfrastructureError("Failed to retrieve document count".to_string())
        })?;
        let segments = segments.map_err(|e| {
            error!("Failed to list segments for stats: {}", e);
            ApplicationError::InfrastructureError("Failed to retrieve segments".to_string())
        })?;
        Ok(EngineStats {
            index: self.mapper_service.index().to_string(),
            types: self.mapper_service.types(),
            total_documents,
            segments: segments.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DocumentMapperParser, FieldDataType, FieldValue, TermFilter};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRepo {
        mappings: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl MappingRepository for MemoryRepo {
        async fn save(&self, doc_type: &str, source: &str) -> Result<(), ApplicationError> {
            self.mappings.lock().unwrap().insert(doc_type.to_string(), source.to_string());
            Ok(())
        }

        async fn get(&self, doc_type: &str) -> Result<Option<String>, ApplicationError> {
            Ok(self.mappings.lock().unwrap().get(doc_type).cloned())
        }

        async fn list(&self) -> Result<Vec<String>, ApplicationError> {
            Ok(self.mappings.lock().unwrap().keys().cloned().collect())
        }
    }

    /// Every refresh seals pending documents into one segment.
    #[derive(Default)]
    struct MemorySink {
        pending: Mutex<Vec<ParsedDocument>>,
        sealed: Mutex<Vec<Arc<dyn SegmentReader>>>,
    }

    struct Sealed(u64, Vec<ParsedDocument>);

    impl SegmentReader for Sealed {
        fn segment_id(&self) -> u64 {
            self.0
        }

        fn max_doc(&self) -> DocId {
            self.1.len() as DocId
        }

        fn field_values(&self, doc: DocId, field: &str) -> Vec<FieldValue> {
            self.1[doc as usize].doc.get_fields(field).map(|f| f.value.clone()).collect()
        }

        fn matches(&self, doc: DocId, filter: &TermFilter) -> bool {
            filter.matches(&self.1[doc as usize].doc)
        }
    }

    #[async_trait]
    impl IndexSink for MemorySink {
        async fn add(&self, document: ParsedDocument) -> Result<(), ApplicationError> {
            self.pending.lock().unwrap().push(document);
            Ok(())
        }

        async fn refresh(&self) -> Result<(), ApplicationError> {
            let docs = std::mem::take(&mut *self.pending.lock().unwrap());
            let mut sealed = self.sealed.lock().unwrap();
            let id = sealed.len() as u64;
            sealed.push(Arc::new(Sealed(id, docs)));
            Ok(())
        }

        async fn segments(&self) -> Result<Vec<Arc<dyn SegmentReader>>, ApplicationError> {
            Ok(self.sealed.lock().unwrap().clone())
        }

        async fn doc_count(&self) -> Result<usize, ApplicationError> {
            let sealed: usize = self.sealed.lock().unwrap().iter().map(|s| s.max_doc() as usize).sum();
            Ok(sealed + self.pending.lock().unwrap().len())
        }
    }

    struct ScanCache;

    struct Values(String, Vec<Vec<f64>>);

    impl NumericFieldData for Values {
        fn field_name(&self) -> &str {
            &self.0
        }

        fn has_value(&self, doc: DocId) -> bool {
            !self.1[doc as usize].is_empty()
        }

        fn for_each_value_in_doc(&self, doc: DocId, proc: &mut dyn FnMut(DocId, f64)) {
            for value in &self.1[doc as usize] {
                proc(doc, *value);
            }
        }
    }

    impl FieldDataCache for ScanCache {
        fn numeric(
            &self,
            _kind: FieldDataType,
            segment: &dyn SegmentReader,
            field: &str,
        ) -> Result<Arc<dyn NumericFieldData>, ApplicationError> {
            let values = (0..segment.max_doc())
                .map(|doc| segment.field_values(doc, field).iter().filter_map(FieldValue::as_f64).collect())
                .collect();
            Ok(Arc::new(Values(field.to_string(), values)))
        }
    }

    struct Fixture {
        mapper_service: Arc<MapperService>,
        repo: Arc<MemoryRepo>,
        mappings: MappingService,
        indexing: IndexingService,
        facets: FacetService,
        stats: StatsService,
    }

    fn fixture() -> Fixture {
        let mapper_service = Arc::new(MapperService::new(DocumentMapperParser::new("twitter")));
        let repo = Arc::new(MemoryRepo::default());
        let sink: Arc<dyn IndexSink> = Arc::new(MemorySink::default());
        Fixture {
            mappings: MappingService::new(mapper_service.clone(), repo.clone()),
            indexing: IndexingService::new(mapper_service.clone(), repo.clone(), sink.clone()),
            facets: FacetService::new(mapper_service.clone(), sink.clone(), Arc::new(ScanCache)),
            stats: StatsService::new(mapper_service.clone(), sink),
            mapper_service,
            repo,
        }
    }

    #[tokio::test]
    async fn put_mapping_persists_the_generated_source() {
        let f = fixture();
        let definition = json!({ "tweet": { "properties": { "likes": { "type": "long" } } } }).to_string();
        let response = f.mappings.put_mapping("tweet", &definition).await.unwrap();
        assert!(response.acknowledged);

        let stored = f.repo.get("tweet").await.unwrap().unwrap();
        let mapper = f.mapper_service.document_mapper("tweet").unwrap();
        assert_eq!(stored, *mapper.mapping_source());

        let mapping = f.mappings.get_mapping("tweet").await.unwrap().mapping;
        assert_eq!(mapping["tweet"]["properties"]["likes"]["type"], "long");
    }

    #[tokio::test]
    async fn conflicting_mapping_is_reported_not_saved() {
        let f = fixture();
        let first = json!({ "tweet": { "properties": { "likes": { "type": "long" } } } }).to_string();
        f.mappings.put_mapping("tweet", &first).await.unwrap();
        let stored = f.repo.get("tweet").await.unwrap();

        let second = json!({ "tweet": { "properties": { "likes": { "type": "string" } } } }).to_string();
        let response = f.mappings.put_mapping("tweet", &second).await.unwrap();
        assert!(!response.acknowledged);
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(f.repo.get("tweet").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn invalid_type_names_are_rejected() {
        let f = fixture();
        for doc_type in ["", "_all", "a.b"] {
            let err = f.indexing.index_document(doc_type, None, b"{}").await.unwrap_err();
            assert!(matches!(err, ApplicationError::InvalidInput(_)));
        }
        assert!(matches!(
            f.mappings.get_mapping("missing").await,
            Err(ApplicationError::MappingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn indexing_grows_and_persists_the_mapping() {
        let f = fixture();
        let response = f
            .indexing
            .index_document("tweet", Some("1"), br#"{"message": "hi", "likes": 3}"#)
            .await
            .unwrap();
        assert_eq!(response.uid, "tweet#1");
        assert_eq!(response.fields_added, vec!["message", "likes"]);
        let stored = f.repo.get("tweet").await.unwrap().unwrap();
        assert!(stored.contains("likes"));

        let again = f
            .indexing
            .index_document("tweet", Some("2"), br#"{"message": "yo", "likes": 4}"#)
            .await
            .unwrap();
        assert!(again.fields_added.is_empty());
    }

    #[tokio::test]
    async fn restore_reloads_stored_mappings() {
        let f = fixture();
        f.repo
            .save("user", &json!({ "user": { "properties": { "age": { "type": "long" } } } }).to_string())
            .await
            .unwrap();
        assert_eq!(f.mappings.restore().await.unwrap(), 1);
        assert_eq!(f.mappings.list_types(), vec!["user"]);
    }

    #[tokio::test]
    async fn statistical_facet_sees_refreshed_documents_only() {
        let f = fixture();
        for (id, likes) in [("1", 2), ("2", 4), ("3", 4)] {
            let body = json!({ "likes": likes }).to_string();
            f.indexing.index_document("tweet", Some(id), body.as_bytes()).await.unwrap();
        }
        let request = || StatisticalFacetRequest {
            name: "likes_stats".to_string(),
            field: "likes".to_string(),
        };
        let before = f.facets.statistical(request()).await.unwrap();
        assert_eq!(before.count, 0);
        assert!(before.min.is_nan());

        f.indexing.refresh().await.unwrap();
        let after = f.facets.statistical(request()).await.unwrap();
        assert_eq!(after.count, 3);
        assert_eq!(after.total, 10.0);
        assert_eq!(after.min, 2.0);
        assert_eq!(after.max, 4.0);

        let stats = f.stats.get_stats().await.unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.segments, 1);
        assert_eq!(stats.types, vec!["tweet"]);
    }

    #[tokio::test]
    async fn facet_on_text_field_is_rejected() {
        let f = fixture();
        f.indexing
            .index_document("tweet", None, br#"{"message": "hello"}"#)
            .await
            .unwrap();
        let err = f
            .facets
            .statistical(StatisticalFacetRequest {
                name: "s".to_string(),
                field: "message".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NonNumericField { .. }));
    }
}
