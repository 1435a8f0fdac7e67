use application::{ApplicationError, MappingRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Mapping definitions kept in memory, keyed by type.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMappingRepository {
    // Type -> mapping source
    mappings: Arc<DashMap<String, Arc<str>>>,
}

impl InMemoryMappingRepository {
    pub fn new() -> Self {
        Self {
            mappings: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl MappingRepository for InMemoryMappingRepository {
    #[instrument(skip(self, source))]
    async fn save(&self, doc_type: &str, source: &str) -> Result<(), ApplicationError> {
        debug!(doc_type = %doc_type, bytes = source.len(), "Saving mapping definition to in-memory store");
        self.mappings.insert(doc_type.to_string(), Arc::from(source));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, doc_type: &str) -> Result<Option<String>, ApplicationError> {
        debug!(doc_type = %doc_type, "Getting mapping definition from in-memory store");
        Ok(self.mappings.get(doc_type).map(|source| source.to_string()))
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<String>, ApplicationError> {
        let mut types: Vec<String> = self.mappings.iter().map(|entry| entry.key().clone()).collect();
        types.sort();
        debug!(count = types.len(), "Listed mapping definitions");
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_replaces_and_lists_sorted() {
        let repo = InMemoryMappingRepository::new();
        repo.save("user", r#"{"user":{}}"#).await.unwrap();
        repo.save("tweet", r#"{"tweet":{}}"#).await.unwrap();
        repo.save("tweet", r#"{"tweet":{"dynamic":false}}"#).await.unwrap();

        assert_eq!(repo.list().await.unwrap(), vec!["tweet", "user"]);
        assert_eq!(
            repo.get("tweet").await.unwrap().as_deref(),
            Some(r#"{"tweet":{"dynamic":false}}"#)
        );
        assert!(repo.get("missing").await.unwrap().is_none());
    }
}
