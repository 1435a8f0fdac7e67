use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use domain::{DocumentMapper, DocumentMapperParser, FieldMapper, MergeResult};
use tracing::{debug, info, instrument, warn};

use crate::ApplicationError;

/// A field resolved by [`MapperService::smart_name`].
#[derive(Debug, Clone)]
pub struct SmartNameFieldMappers {
    mapper: Arc<FieldMapper>,
    /// Set when the name was qualified with its type, e.g. `tweet.user.name`.
    doc_mapper: Option<Arc<DocumentMapper>>,
}

impl SmartNameFieldMappers {
    pub fn mapper(&self) -> &Arc<FieldMapper> {
        &self.mapper
    }

    pub fn document_mapper(&self) -> Option<&Arc<DocumentMapper>> {
        self.doc_mapper.as_ref()
    }

    pub fn has_document_mapper(&self) -> bool {
        self.doc_mapper.is_some()
    }
}

/// The document mappers of one index, keyed by type.
#[derive(Debug)]
pub struct MapperService {
    index: String,
    parser: DocumentMapperParser,
    mappers: DashMap<String, Arc<DocumentMapper>>,
}

impl MapperService {
    pub fn new(parser: DocumentMapperParser) -> Self {
        Self {
            index: parser.index().to_string(),
            parser,
            mappers: DashMap::new(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn document_mapper(&self, doc_type: &str) -> Option<Arc<DocumentMapper>> {
        self.mappers.get(doc_type).map(|entry| entry.value().clone())
    }

    /// Every known type, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.mappers.iter().map(|entry| entry.key().clone()).collect();
        types.sort();
        types
    }

    /// Document mappers in type order.
    fn document_mappers(&self) -> Vec<Arc<DocumentMapper>> {
        let mut mappers: Vec<Arc<DocumentMapper>> = self.mappers.iter().map(|entry| entry.value().clone()).collect();
        mappers.sort_by(|a, b| a.doc_type().cmp(b.doc_type()));
        mappers
    }

    /// Adds a type, or merges `source` into an existing one.
    ///
    /// The merge is only committed when it has no conflicts, so a conflicting
    /// definition leaves the type untouched. The check and the commit are one
    /// step on the mapper, so concurrent puts cannot interleave between them.
    #[instrument(skip(self, source), fields(index = %self.index))]
    pub fn put_mapping(&self, doc_type: &str, source: &str) -> Result<MergeResult, ApplicationError> {
        let incoming = self.parser.parse(Some(doc_type), source)?;
        let existing = match self.mappers.entry(doc_type.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(incoming));
                info!(doc_type = %doc_type, "Added mapping");
                return Ok(MergeResult::default());
            }
            Entry::Occupied(entry) => entry.get().clone(),
        };

        let result = existing.merge_if_clean(&incoming)?;
        if result.has_conflicts() {
            warn!(doc_type = %doc_type, conflicts = result.conflicts().len(), "Rejected mapping with conflicts");
        } else {
            info!(doc_type = %doc_type, "Merged mapping");
        }
        Ok(result)
    }

    /// The mapper for `doc_type`, created with an empty, dynamic mapping
    /// when the type is new.
    pub fn document_mapper_with_auto_create(&self, doc_type: &str) -> Result<Arc<DocumentMapper>, ApplicationError> {
        if let Some(mapper) = self.document_mapper(doc_type) {
            return Ok(mapper);
        }
        let mapper = match self.mappers.entry(doc_type.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let mapper = Arc::new(self.parser.parse(Some(doc_type), "{}")?);
                entry.insert(mapper.clone());
                debug!(doc_type = %doc_type, "Created dynamic mapping");
                mapper
            }
        };
        Ok(mapper)
    }

    /// Resolves a field name across all types.
    ///
    /// `type.field` resolves `field` in that type only and carries the
    /// document mapper along. Otherwise the name is tried as a leaf name,
    /// then as a full name, then as an index name, over all types in order.
    pub fn smart_name(&self, name: &str) -> Option<SmartNameFieldMappers> {
        if let Some((doc_type, field)) = name.split_once('.') {
            if let Some(doc_mapper) = self.document_mapper(doc_type) {
                if let Some(mapper) = doc_mapper.mappers().smart_name(field) {
                    return Some(SmartNameFieldMappers {
                        mapper: mapper.clone(),
                        doc_mapper: Some(doc_mapper.clone()),
                    });
                }
            }
        }

        let doc_mappers = self.document_mappers();
        let lookups: [fn(&domain::FieldMappers, &str) -> Option<Arc<FieldMapper>>; 3] = [
            |mappers, name| mappers.name(name).cloned(),
            |mappers, name| mappers.full_name(name).cloned(),
            |mappers, name| mappers.index_name(name).cloned(),
        ];
        lookups.iter().find_map(|lookup| {
            doc_mappers
                .iter()
                .find_map(|doc_mapper| lookup(&doc_mapper.mappers(), name))
                .map(|mapper| SmartNameFieldMappers {
                    mapper,
                    doc_mapper: None,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> MapperService {
        MapperService::new(DocumentMapperParser::new("twitter"))
    }

    #[test]
    fn put_mapping_adds_then_merges() {
        let service = service();
        let first = json!({ "tweet": { "properties": { "message": { "type": "string" } } } }).to_string();
        assert!(!service.put_mapping("tweet", &first).unwrap().has_conflicts());

        let second = json!({ "tweet": { "properties": { "likes": { "type": "long" } } } }).to_string();
        assert!(!service.put_mapping("tweet", &second).unwrap().has_conflicts());

        let mapper = service.document_mapper("tweet").unwrap();
        assert!(mapper.mappers().full_name("message").is_some());
        assert!(mapper.mappers().full_name("likes").is_some());
        assert_eq!(service.types(), vec!["tweet"]);
    }

    #[test]
    fn conflicting_mapping_is_not_committed() {
        let service = service();
        let first = json!({ "tweet": { "properties": { "message": { "type": "string" } } } }).to_string();
        service.put_mapping("tweet", &first).unwrap();
        let before = service.document_mapper("tweet").unwrap().mapping_source();

        let conflicting = json!({
            "tweet": { "properties": { "message": { "type": "long" }, "extra": { "type": "long" } } }
        })
        .to_string();
        let result = service.put_mapping("tweet", &conflicting).unwrap();
        assert!(result.has_conflicts());

        let mapper = service.document_mapper("tweet").unwrap();
        assert_eq!(mapper.mapping_source(), before);
        assert!(mapper.mappers().full_name("extra").is_none());
    }

    #[test]
    fn racing_puts_never_commit_a_conflicting_definition() {
        use domain::FieldType;

        for _ in 0..20 {
            let service = service();
            service
                .put_mapping("tweet", &json!({ "tweet": { "properties": {} } }).to_string())
                .unwrap();
            let as_long = json!({ "tweet": { "properties": { "score": { "type": "long" } } } }).to_string();
            let as_double = json!({
                "tweet": { "properties": { "score": { "type": "double" }, "extra": { "type": "long" } } }
            })
            .to_string();

            std::thread::scope(|scope| {
                scope.spawn(|| service.put_mapping("tweet", &as_long).unwrap());
                scope.spawn(|| service.put_mapping("tweet", &as_double).unwrap());
            });

            // `extra` only ever arrives together with a double `score`.
            let mapper = service.document_mapper("tweet").unwrap();
            let score = mapper.mappers().full_name("score").unwrap().field_type();
            match mapper.mappers().full_name("extra") {
                Some(_) => assert_eq!(score, FieldType::Double),
                None => assert_eq!(score, FieldType::Long),
            }
        }
    }

    #[test]
    fn invalid_definition_is_a_mapper_error() {
        let err = service().put_mapping("tweet", "{ nope").unwrap_err();
        assert!(matches!(err, ApplicationError::Mapper(_)));
    }

    #[test]
    fn auto_create_returns_the_same_mapper() {
        let service = service();
        let first = service.document_mapper_with_auto_create("event").unwrap();
        let second = service.document_mapper_with_auto_create("event").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.root().is_dynamic());
    }

    #[test]
    fn smart_name_prefers_the_type_qualified_form() {
        let service = service();
        service
            .put_mapping(
                "tweet",
                &json!({ "tweet": { "properties": { "user": { "properties": { "age": { "type": "long" } } } } } })
                    .to_string(),
            )
            .unwrap();
        service
            .put_mapping(
                "user",
                &json!({ "user": { "properties": { "age": { "type": "integer", "index_name": "years" } } } })
                    .to_string(),
            )
            .unwrap();

        let qualified = service.smart_name("tweet.user.age").unwrap();
        assert!(qualified.has_document_mapper());
        assert_eq!(qualified.mapper().full_name(), "user.age");

        // Leaf names win over full names, and types are searched in order.
        let by_name = service.smart_name("age").unwrap();
        assert!(!by_name.has_document_mapper());
        assert_eq!(by_name.mapper().full_name(), "user.age");

        let by_index_name = service.smart_name("years").unwrap();
        assert_eq!(by_index_name.mapper().full_name(), "age");
        assert!(service.smart_name("missing").is_none());
    }
}
