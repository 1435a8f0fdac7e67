use application::{ApplicationError, DocId, IndexSink, SegmentReader};
use async_trait::async_trait;
use domain::{Document, FieldValue, ParsedDocument, TermFilter};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, trace};

/// An immutable batch of documents. Doc ids are positions in the batch.
#[derive(Debug)]
pub struct InMemorySegment {
    id: u64,
    docs: Vec<Document>,
    uids: Vec<String>,
}

impl InMemorySegment {
    pub fn new(id: u64, docs: Vec<ParsedDocument>) -> Self {
        let (uids, docs) = docs.into_iter().map(|parsed| (parsed.uid, parsed.doc)).unzip();
        Self { id, docs, uids }
    }

    pub fn document(&self, doc: DocId) -> Option<&Document> {
        self.docs.get(doc as usize)
    }

    pub fn uid(&self, doc: DocId) -> Option<&str> {
        self.uids.get(doc as usize).map(String::as_str)
    }
}

impl SegmentReader for InMemorySegment {
    fn segment_id(&self) -> u64 {
        self.id
    }

    fn max_doc(&self) -> DocId {
        self.docs.len() as DocId
    }

    fn field_values(&self, doc: DocId, field: &str) -> Vec<FieldValue> {
        self.document(doc)
            .map(|document| document.get_fields(field).map(|f| f.value.clone()).collect())
            .unwrap_or_default()
    }

    fn matches(&self, doc: DocId, filter: &TermFilter) -> bool {
        self.document(doc).is_some_and(|document| filter.matches(document))
    }
}

/// In-memory index: documents are buffered until a refresh (or a full
/// buffer) seals them into a new segment.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    segment_max_docs: usize,
    pending: Arc<Mutex<Vec<ParsedDocument>>>,
    segments: Arc<RwLock<Vec<Arc<InMemorySegment>>>>,
    next_segment_id: Arc<AtomicU64>,
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl InMemoryIndex {
    pub fn new(segment_max_docs: usize) -> Self {
        Self {
            segment_max_docs: segment_max_docs.max(1),
            pending: Arc::new(Mutex::new(Vec::new())),
            segments: Arc::new(RwLock::new(Vec::new())),
            next_segment_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seals the pending buffer. Returns the new segment's size.
    fn seal(&self, pending: &mut Vec<ParsedDocument>) -> usize {
        if pending.is_empty() {
            return 0;
        }
        let id = self.next_segment_id.fetch_add(1, Ordering::Relaxed);
        let segment = Arc::new(InMemorySegment::new(id, std::mem::take(pending)));
        let size = segment.docs.len();
        self.segments.write().push(segment);
        debug!(segment = id, docs = size, "Sealed segment");
        size
    }
}

#[async_trait]
impl IndexSink for InMemoryIndex {
    #[instrument(skip(self, document), fields(uid = %document.uid))]
    async fn add(&self, document: ParsedDocument) -> Result<(), ApplicationError> {
        let mut pending = self.pending.lock();
        pending.push(document);
        trace!(pending = pending.len(), "Buffered document");
        if pending.len() >= self.segment_max_docs {
            self.seal(&mut pending);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<(), ApplicationError> {
        let sealed = self.seal(&mut self.pending.lock());
        info!(docs = sealed, segments = self.segments.read().len(), "Index refreshed");
        Ok(())
    }

    async fn segments(&self) -> Result<Vec<Arc<dyn SegmentReader>>, ApplicationError> {
        Ok(self
            .segments
            .read()
            .iter()
            .map(|segment| segment.clone() as Arc<dyn SegmentReader>)
            .collect())
    }

    async fn doc_count(&self) -> Result<usize, ApplicationError> {
        // Pending first: a concurrent seal can only move documents into segments.
        let pending = self.pending.lock().len();
        let sealed: usize = self.segments.read().iter().map(|segment| segment.docs.len()).sum();
        Ok(pending + sealed)
    }
}
