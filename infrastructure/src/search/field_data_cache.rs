use application::{ApplicationError, DocId, FieldDataCache, NumericFieldData, SegmentReader};
use dashmap::DashMap;
use domain::{FieldDataType, FieldValue};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Numeric values of one field over one segment, stored column-wise.
///
/// The values of doc `d` are `values[offsets[d]..offsets[d + 1]]`.
#[derive(Debug)]
pub struct ColumnarNumericFieldData {
    field_name: String,
    offsets: Vec<usize>,
    values: Vec<f64>,
}

impl ColumnarNumericFieldData {
    /// Loads `field` from every document of `segment`. Values that have no
    /// numeric reading are skipped; `Long` data truncates fractions.
    pub fn load(kind: FieldDataType, segment: &dyn SegmentReader, field: &str) -> Result<Self, ApplicationError> {
        if !kind.is_numeric() {
            return Err(ApplicationError::FieldData {
                field: field.to_string(),
                reason: format!("[{kind:?}] field data is not numeric"),
            });
        }
        let max_doc = segment.max_doc();
        let mut offsets = Vec::with_capacity(max_doc as usize + 1);
        let mut values = Vec::new();
        offsets.push(0);
        for doc in 0..max_doc {
            values.extend(
                segment
                    .field_values(doc, field)
                    .iter()
                    .filter_map(FieldValue::as_f64)
                    .map(|value| match kind {
                        FieldDataType::Long => value.trunc(),
                        _ => value,
                    }),
            );
            offsets.push(values.len());
        }
        Ok(Self {
            field_name: field.to_string(),
            offsets,
            values,
        })
    }

    fn doc_values(&self, doc: DocId) -> &[f64] {
        let doc = doc as usize;
        match (self.offsets.get(doc), self.offsets.get(doc + 1)) {
            (Some(&start), Some(&end)) => &self.values[start..end],
            _ => &[],
        }
    }
}

impl NumericFieldData for ColumnarNumericFieldData {
    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn has_value(&self, doc: DocId) -> bool {
        !self.doc_values(doc).is_empty()
    }

    fn for_each_value_in_doc(&self, doc: DocId, proc: &mut dyn FnMut(DocId, f64)) {
        for value in self.doc_values(doc) {
            proc(doc, *value);
        }
    }
}

/// Field data cache keyed by segment, field and kind. Segments are
/// immutable, so an entry never goes stale.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFieldDataCache {
    entries: Arc<DashMap<(u64, String, FieldDataType), Arc<ColumnarNumericFieldData>>>,
}

impl InMemoryFieldDataCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FieldDataCache for InMemoryFieldDataCache {
    #[instrument(skip(self, segment), fields(segment = segment.segment_id()))]
    fn numeric(
        &self,
        kind: FieldDataType,
        segment: &dyn SegmentReader,
        field: &str,
    ) -> Result<Arc<dyn NumericFieldData>, ApplicationError> {
        let key = (segment.segment_id(), field.to_string(), kind);
        if let Some(hit) = self.entries.get(&key) {
            trace!(field = %field, "Field data cache hit");
            return Ok(hit.value().clone());
        }
        // The entry holds its shard lock while loading, so a key is built once.
        let data = match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let data = Arc::new(ColumnarNumericFieldData::load(kind, segment, field)?);
                debug!(field = %field, values = data.values.len(), "Loaded field data");
                entry.insert(data).value().clone()
            }
        };
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TermFilter;

    struct Rows(u64, Vec<Vec<FieldValue>>);

    impl SegmentReader for Rows {
        fn segment_id(&self) -> u64 {
            self.0
        }

        fn max_doc(&self) -> DocId {
            self.1.len() as DocId
        }

        fn field_values(&self, doc: DocId, _field: &str) -> Vec<FieldValue> {
            self.1[doc as usize].clone()
        }

        fn matches(&self, _doc: DocId, _filter: &TermFilter) -> bool {
            true
        }
    }

    fn values_of(data: &dyn NumericFieldData, doc: DocId) -> Vec<f64> {
        let mut values = Vec::new();
        data.for_each_value_in_doc(doc, &mut |_, value| values.push(value));
        values
    }

    #[test]
    fn columns_keep_per_doc_values_in_order() {
        let segment = Rows(
            1,
            vec![
                vec![FieldValue::Long(3), FieldValue::Long(1)],
                vec![],
                vec![FieldValue::Double(2.5), FieldValue::Text("oops".into())],
            ],
        );
        let data = ColumnarNumericFieldData::load(FieldDataType::Double, &segment, "likes").unwrap();
        assert_eq!(data.field_name(), "likes");
        assert_eq!(values_of(&data, 0), vec![3.0, 1.0]);
        assert!(!data.has_value(1));
        assert_eq!(values_of(&data, 2), vec![2.5]);
        assert!(!data.has_value(42));

        let longs = ColumnarNumericFieldData::load(FieldDataType::Long, &segment, "likes").unwrap();
        assert_eq!(values_of(&longs, 2), vec![2.0]);
    }

    #[test]
    fn cache_builds_each_key_once() {
        let cache = InMemoryFieldDataCache::new();
        let first_segment = Rows(1, vec![vec![FieldValue::Long(1)]]);
        let second_segment = Rows(2, vec![vec![FieldValue::Long(1)]]);

        let a = cache.numeric(FieldDataType::Long, &first_segment, "likes").unwrap();
        let b = cache.numeric(FieldDataType::Long, &first_segment, "likes").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.numeric(FieldDataType::Long, &second_segment, "likes").unwrap();
        cache.numeric(FieldDataType::Double, &first_segment, "likes").unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn string_field_data_is_rejected() {
        let cache = InMemoryFieldDataCache::new();
        let err = cache
            .numeric(FieldDataType::String, &Rows(1, vec![]), "message")
            .err().unwrap();
        assert!(matches!(err, ApplicationError::FieldData { .. }));
        assert!(cache.is_empty());
    }
}
