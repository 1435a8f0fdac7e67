use std::sync::Arc;

use domain::{FieldDataType, FieldValue, TermFilter};

use crate::ApplicationError;

/// Position of a document inside one segment.
pub type DocId = u32;

/// Read access to one immutable segment of indexed documents.
pub trait SegmentReader: Send + Sync {
    /// Stable identity of the segment, used as a cache key.
    fn segment_id(&self) -> u64;

    /// One past the highest doc id in the segment.
    fn max_doc(&self) -> DocId;

    /// Values stored under the index name `field` for `doc`, in document order.
    fn field_values(&self, doc: DocId, field: &str) -> Vec<FieldValue>;

    /// Whether `doc` carries the term `filter` asks for.
    fn matches(&self, doc: DocId, filter: &TermFilter) -> bool;
}

/// Columnar numeric values of one field over one segment.
pub trait NumericFieldData: Send + Sync {
    fn field_name(&self) -> &str;

    fn has_value(&self, doc: DocId) -> bool;

    /// Calls `proc` once per value of `doc`, in the order they were indexed.
    fn for_each_value_in_doc(&self, doc: DocId, proc: &mut dyn FnMut(DocId, f64));
}

/// Per-segment field data, loaded on first use and shared afterwards.
pub trait FieldDataCache: Send + Sync {
    fn numeric(
        &self,
        kind: FieldDataType,
        segment: &dyn SegmentReader,
        field: &str,
    ) -> Result<Arc<dyn NumericFieldData>, ApplicationError>;
}
