use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::MapperError;
use crate::context::ParseContextPool;
use crate::document::TermFilter;
use crate::field::FieldMapper;
use crate::listener::FieldMapperListener;
use crate::merge::{MergeContext, MergeFlags, MergeResult};
use crate::object::{Mapper, ObjectMapper};
use crate::registry::FieldMappers;
use crate::special::{SpecialFieldMapper, SpecialKind};

/// Supplies ids for documents that carry none.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn generate(&self) -> String;
}

/// Random UUID v4 ids, hyphen-free.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Opaque handle to an analyzer, known only by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAnalyzer {
    name: String,
}

impl NamedAnalyzer {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.name == Self::DEFAULT
    }
}

impl Default for NamedAnalyzer {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

/// The schema of one document type.
///
/// Readers (parsing, lookups) never block: the mapper tree, the field
/// registry, the attributes and the mapping source are published as whole
/// snapshots. Writers (dynamic field registration, merge commits, listener
/// registration) serialize on the listener list's mutex.
pub struct DocumentMapper {
    index: String,
    doc_type: String,
    pub(crate) root: ArcSwap<ObjectMapper>,
    field_mappers: ArcSwap<FieldMappers>,
    attributes: ArcSwap<Map<String, Value>>,
    mapping_source: ArcSwap<String>,
    pub(crate) uid: SpecialFieldMapper,
    pub(crate) id: SpecialFieldMapper,
    pub(crate) type_mapper: SpecialFieldMapper,
    pub(crate) index_mapper: SpecialFieldMapper,
    pub(crate) source: SpecialFieldMapper,
    pub(crate) all: SpecialFieldMapper,
    pub(crate) boost: Option<SpecialFieldMapper>,
    index_analyzer: NamedAnalyzer,
    search_analyzer: NamedAnalyzer,
    type_filter: TermFilter,
    pub(crate) date_detection: bool,
    pub(crate) id_generator: Arc<dyn IdGenerator>,
    /// Also the write mutex for the snapshots above.
    pub(crate) listeners: Mutex<Vec<Arc<dyn FieldMapperListener>>>,
    merge_lock: Mutex<()>,
    pub(crate) contexts: ParseContextPool,
}

impl fmt::Debug for DocumentMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentMapper")
            .field("index", &self.index)
            .field("doc_type", &self.doc_type)
            .field("field_mappers", &self.field_mappers.load().len())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

impl DocumentMapper {
    pub fn builder(index: impl Into<String>) -> DocumentMapperBuilder {
        DocumentMapperBuilder {
            index: index.into(),
            root: None,
            uid: SpecialFieldMapper::new(SpecialKind::Uid),
            id: SpecialFieldMapper::new(SpecialKind::Id),
            type_mapper: SpecialFieldMapper::new(SpecialKind::Type),
            index_mapper: SpecialFieldMapper::new(SpecialKind::Index),
            source: SpecialFieldMapper::new(SpecialKind::Source),
            all: SpecialFieldMapper::new(SpecialKind::All),
            boost: Some(SpecialFieldMapper::new(SpecialKind::Boost)),
            index_analyzer: NamedAnalyzer::default(),
            search_analyzer: NamedAnalyzer::default(),
            attributes: Map::new(),
            mapping_source: None,
            date_detection: true,
            id_generator: Arc::new(UuidGenerator),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Current snapshot of the mapper tree.
    pub fn root(&self) -> Arc<ObjectMapper> {
        self.root.load_full()
    }

    /// Current snapshot of the field registry.
    pub fn mappers(&self) -> Arc<FieldMappers> {
        self.field_mappers.load_full()
    }

    pub fn attributes(&self) -> Arc<Map<String, Value>> {
        self.attributes.load_full()
    }

    /// The mapping definition this mapper was built from, or the one
    /// regenerated after its last change.
    pub fn mapping_source(&self) -> Arc<String> {
        self.mapping_source.load_full()
    }

    pub fn special(&self, kind: SpecialKind) -> Option<&SpecialFieldMapper> {
        match kind {
            SpecialKind::Uid => Some(&self.uid),
            SpecialKind::Id => Some(&self.id),
            SpecialKind::Type => Some(&self.type_mapper),
            SpecialKind::Index => Some(&self.index_mapper),
            SpecialKind::Source => Some(&self.source),
            SpecialKind::All => Some(&self.all),
            SpecialKind::Boost => self.boost.as_ref(),
        }
    }

    pub fn index_analyzer(&self) -> &NamedAnalyzer {
        &self.index_analyzer
    }

    pub fn search_analyzer(&self) -> &NamedAnalyzer {
        &self.search_analyzer
    }

    /// Filter matching documents of this type.
    pub fn type_filter(&self) -> &TermFilter {
        &self.type_filter
    }

    pub fn date_detection(&self) -> bool {
        self.date_detection
    }

    /// Subscribes `listener` to field mapper registrations. With
    /// `include_existing`, every mapper already registered is replayed to it
    /// first, before any concurrent registration can reach it.
    ///
    /// Listeners are called with the write lock held; see
    /// [`FieldMapperListener`].
    pub fn add_field_mapper_listener(&self, listener: Arc<dyn FieldMapperListener>, include_existing: bool) {
        let mut listeners = self.listeners.lock();
        if include_existing {
            for mapper in self.field_mappers.load().iter() {
                listener.field_mapper(mapper);
            }
        }
        listeners.push(listener);
    }

    /// Mapping definition of the current tree, as JSON text.
    pub fn build_source(&self) -> Result<String, MapperError> {
        let root = self.root.load();
        let attributes = self.attributes.load();
        self.generate_source(&root, &attributes)
    }

    fn generate_source(&self, root: &ObjectMapper, attributes: &Map<String, Value>) -> Result<String, MapperError> {
        let mut skip = vec![self.id.name()];
        if let Some(boost) = &self.boost {
            skip.push(boost.name());
        }
        let mut body = root.to_json(&skip);
        if !self.date_detection {
            body.insert("date_detection".to_string(), Value::Bool(false));
        }
        if !self.index_analyzer.is_default() {
            body.insert("index_analyzer".to_string(), Value::from(self.index_analyzer.name()));
        }
        if !self.search_analyzer.is_default() {
            body.insert("search_analyzer".to_string(), Value::from(self.search_analyzer.name()));
        }
        let specials = [
            Some(&self.id),
            Some(&self.type_mapper),
            Some(&self.uid),
            Some(&self.index_mapper),
            Some(&self.source),
            Some(&self.all),
            self.boost.as_ref(),
        ];
        for special in specials.into_iter().flatten() {
            if let Some(definition) = special.to_json() {
                body.insert(special.kind().key().to_string(), definition);
            }
        }
        if !attributes.is_empty() {
            body.insert("_attributes".to_string(), Value::Object(attributes.clone()));
        }
        let mut mapping = Map::new();
        mapping.insert(self.doc_type.clone(), Value::Object(body));
        serde_json::to_string(&Value::Object(mapping)).map_err(|e| MapperError::SourceGeneration(e.to_string()))
    }

    /// Merges `other` into this mapper.
    ///
    /// With `simulate` the merge runs on a private copy and only reports
    /// conflicts. Otherwise the merged tree, the registry, the attributes and
    /// a regenerated mapping source are published, and listeners hear about
    /// every added leaf. Non-conflicting changes are applied even when
    /// conflicts were found.
    pub fn merge(&self, other: &DocumentMapper, flags: MergeFlags) -> Result<MergeResult, MapperError> {
        let _merging = self.merge_lock.lock();
        let listeners = self.listeners.lock();
        self.merge_locked(other, flags, &listeners)
    }

    /// Merges `other` only when it has no conflicts with this mapper. The
    /// check and the commit run under the same locks, so no other merge or
    /// dynamic addition can slip in between them.
    pub fn merge_if_clean(&self, other: &DocumentMapper) -> Result<MergeResult, MapperError> {
        let _merging = self.merge_lock.lock();
        let listeners = self.listeners.lock();
        let simulation = self.merge_locked(other, MergeFlags::simulate(true), &listeners)?;
        if simulation.has_conflicts() {
            return Ok(simulation);
        }
        self.merge_locked(other, MergeFlags::simulate(false), &listeners)
    }

    fn merge_locked(
        &self,
        other: &DocumentMapper,
        flags: MergeFlags,
        listeners: &[Arc<dyn FieldMapperListener>],
    ) -> Result<MergeResult, MapperError> {
        let mut root = ObjectMapper::clone(&self.root.load());
        let mut context = MergeContext::new(flags, self.all.enabled());
        root.merge(&other.root.load(), &mut context);

        for conflict in context.conflicts() {
            warn!(doc_type = %self.doc_type, conflict = %conflict, "Mapping merge conflict");
        }
        if flags.simulate {
            return Ok(context.into_result());
        }

        let attributes = other.attributes.load_full();
        let source = self.generate_source(&root, &attributes)?;
        let changed: Vec<Arc<FieldMapper>> = context
            .added()
            .iter()
            .chain(context.replaced())
            .cloned()
            .collect();

        self.root.store(Arc::new(root));
        if !changed.is_empty() {
            let registry = self.field_mappers.load().concat(changed);
            self.field_mappers.store(Arc::new(registry));
        }
        self.attributes.store(attributes);
        self.mapping_source.store(Arc::new(source));
        debug!(
            doc_type = %self.doc_type,
            added = context.added().len(),
            replaced = context.replaced().len(),
            "Committed mapping merge"
        );

        for mapper in context.added() {
            for listener in listeners.iter() {
                listener.field_mapper(mapper);
            }
        }
        Ok(context.into_result())
    }

    /// Publishes `root` plus `added` leaves. Caller holds the write mutex.
    pub(crate) fn publish(&self, root: ObjectMapper, added: &[Arc<FieldMapper>]) -> Result<(), MapperError> {
        let source = self.generate_source(&root, &self.attributes.load())?;
        self.root.store(Arc::new(root));
        if !added.is_empty() {
            let registry = self.field_mappers.load().concat(added.iter().cloned());
            self.field_mappers.store(Arc::new(registry));
        }
        self.mapping_source.store(Arc::new(source));
        Ok(())
    }
}

pub struct DocumentMapperBuilder {
    index: String,
    root: Option<ObjectMapper>,
    uid: SpecialFieldMapper,
    id: SpecialFieldMapper,
    type_mapper: SpecialFieldMapper,
    index_mapper: SpecialFieldMapper,
    source: SpecialFieldMapper,
    all: SpecialFieldMapper,
    boost: Option<SpecialFieldMapper>,
    index_analyzer: NamedAnalyzer,
    search_analyzer: NamedAnalyzer,
    attributes: Map<String, Value>,
    mapping_source: Option<String>,
    date_detection: bool,
    id_generator: Arc<dyn IdGenerator>,
}

impl DocumentMapperBuilder {
    pub fn root(mut self, root: ObjectMapper) -> Self {
        self.root = Some(root);
        self
    }

    /// Replaces the special mapper of the same kind.
    pub fn special(mut self, special: SpecialFieldMapper) -> Self {
        match special.kind() {
            SpecialKind::Uid => self.uid = special,
            SpecialKind::Id => self.id = special,
            SpecialKind::Type => self.type_mapper = special,
            SpecialKind::Index => self.index_mapper = special,
            SpecialKind::Source => self.source = special,
            SpecialKind::All => self.all = special,
            SpecialKind::Boost => self.boost = Some(special),
        }
        self
    }

    pub fn without_boost(mut self) -> Self {
        self.boost = None;
        self
    }

    pub fn index_analyzer(mut self, analyzer: NamedAnalyzer) -> Self {
        self.index_analyzer = analyzer;
        self
    }

    pub fn search_analyzer(mut self, analyzer: NamedAnalyzer) -> Self {
        self.search_analyzer = analyzer;
        self
    }

    pub fn attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Definition text to report as the mapping source. Generated from the
    /// tree when not given.
    pub fn mapping_source(mut self, source: impl Into<String>) -> Self {
        self.mapping_source = Some(source.into());
        self
    }

    pub fn date_detection(mut self, date_detection: bool) -> Self {
        self.date_detection = date_detection;
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn build(self) -> Result<DocumentMapper, MapperError> {
        let mut root = self
            .root
            .ok_or_else(|| MapperError::Configuration("a root object mapper is required".to_string()))?;
        let doc_type = root.name().to_string();

        if !self.all.enabled() {
            root.include_in_all(false);
        }
        root.put_mapper(Mapper::Field(self.id.field_mapper().clone()));
        if let Some(boost) = &self.boost {
            root.put_mapper(Mapper::Field(boost.field_mapper().clone()));
        }

        let mut specials = Vec::new();
        if self.index_mapper.enabled() {
            specials.push(self.index_mapper.field_mapper().clone());
        }
        specials.push(self.type_mapper.field_mapper().clone());
        specials.push(self.source.field_mapper().clone());
        specials.push(self.uid.field_mapper().clone());
        specials.push(self.all.field_mapper().clone());
        if let Some(boost) = &self.boost {
            specials.push(boost.field_mapper().clone());
        }
        let mut leaves = Vec::new();
        root.traverse(&mut |mapper: &Arc<FieldMapper>| leaves.push(mapper.clone()));
        let field_mappers = FieldMappers::new(specials).concat(leaves);

        let mapper = DocumentMapper {
            index: self.index,
            type_filter: TermFilter::new(self.type_mapper.index_name(), doc_type.as_str()),
            doc_type,
            root: ArcSwap::from_pointee(root),
            field_mappers: ArcSwap::from_pointee(field_mappers),
            attributes: ArcSwap::from_pointee(self.attributes),
            mapping_source: ArcSwap::from_pointee(String::new()),
            uid: self.uid,
            id: self.id,
            type_mapper: self.type_mapper,
            index_mapper: self.index_mapper,
            source: self.source,
            all: self.all,
            boost: self.boost,
            index_analyzer: self.index_analyzer,
            search_analyzer: self.search_analyzer,
            date_detection: self.date_detection,
            id_generator: self.id_generator,
            listeners: Mutex::new(Vec::new()),
            merge_lock: Mutex::new(()),
            contexts: ParseContextPool::default(),
        };
        let source = match self.mapping_source {
            Some(source) => source,
            None => mapper.build_source()?,
        };
        mapper.mapping_source.store(Arc::new(source));
        Ok(mapper)
    }
}
