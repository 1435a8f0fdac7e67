use std::sync::Arc;

use domain::{FieldDataType, TermFilter};
use serde::Serialize;
use tracing::{debug, trace};

use crate::ApplicationError;
use crate::field_data::{DocId, FieldDataCache, NumericFieldData, SegmentReader};
use crate::mapper_service::MapperService;

/// Running min/max/sum/sum-of-squares/count over a stream of values.
/// `min` and `max` stay NaN until the first value arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsProc {
    min: f64,
    max: f64,
    total: f64,
    sum_of_squares: f64,
    count: u64,
}

impl Default for StatsProc {
    fn default() -> Self {
        Self {
            min: f64::NAN,
            max: f64::NAN,
            total: 0.0,
            sum_of_squares: 0.0,
            count: 0,
        }
    }
}

impl StatsProc {
    pub fn on_value(&mut self, value: f64) {
        if value < self.min || self.min.is_nan() {
            self.min = value;
        }
        if value > self.max || self.max.is_nan() {
            self.max = value;
        }
        self.sum_of_squares += value * value;
        self.total += value;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Result of a statistical facet.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatisticalFacet {
    pub name: String,
    pub field_name: String,
    pub min: f64,
    pub max: f64,
    pub total: f64,
    pub sum_of_squares: f64,
    pub count: u64,
}

impl StatisticalFacet {
    pub fn mean(&self) -> f64 {
        self.total / self.count as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        let count = self.count as f64;
        (self.sum_of_squares - self.total * self.total / count) / count
    }

    pub fn std_deviation(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Streams the numeric values of one field through a [`StatsProc`],
/// one segment at a time.
pub struct StatisticalFacetCollector {
    facet_name: String,
    field_name: String,
    index_field_name: String,
    field_data_type: FieldDataType,
    /// Restricts collection to one type when the field name was qualified with it.
    type_filter: Option<TermFilter>,
    cache: Arc<dyn FieldDataCache>,
    segment: Option<Arc<dyn SegmentReader>>,
    field_data: Option<Arc<dyn NumericFieldData>>,
    stats: StatsProc,
}

impl StatisticalFacetCollector {
    pub fn new(
        facet_name: impl Into<String>,
        field_name: &str,
        mapper_service: &MapperService,
        cache: Arc<dyn FieldDataCache>,
    ) -> Result<Self, ApplicationError> {
        let smart_name = mapper_service
            .smart_name(field_name)
            .ok_or_else(|| ApplicationError::UnknownField(field_name.to_string()))?;
        let mapper = smart_name.mapper();
        let field_data_type = mapper.field_data_type();
        if !field_data_type.is_numeric() {
            return Err(ApplicationError::NonNumericField {
                field: field_name.to_string(),
                field_type: mapper.field_type().as_str().to_string(),
            });
        }
        let type_filter = smart_name
            .document_mapper()
            .map(|doc_mapper| doc_mapper.type_filter().clone());
        debug!(field = %field_name, index_name = %mapper.index_name(), scoped = type_filter.is_some(), "Created statistical facet collector");

        Ok(Self {
            facet_name: facet_name.into(),
            field_name: field_name.to_string(),
            index_field_name: mapper.index_name().to_string(),
            field_data_type,
            type_filter,
            cache,
            segment: None,
            field_data: None,
            stats: StatsProc::default(),
        })
    }

    /// Switches collection to `segment`, loading its field data.
    pub fn set_next_reader(&mut self, segment: Arc<dyn SegmentReader>) -> Result<(), ApplicationError> {
        let field_data = self
            .cache
            .numeric(self.field_data_type, segment.as_ref(), &self.index_field_name)?;
        trace!(segment = segment.segment_id(), field = %self.index_field_name, "Loaded field data");
        self.field_data = Some(field_data);
        self.segment = Some(segment);
        Ok(())
    }

    /// Adds the values of `doc` in the current segment.
    pub fn collect(&mut self, doc: DocId) {
        let (Some(segment), Some(field_data)) = (&self.segment, &self.field_data) else {
            return;
        };
        if let Some(filter) = &self.type_filter {
            if !segment.matches(doc, filter) {
                return;
            }
        }
        let stats = &mut self.stats;
        field_data.for_each_value_in_doc(doc, &mut |_, value| stats.on_value(value));
    }

    /// Adds every document of the current segment.
    pub fn collect_all(&mut self) {
        let max_doc = self.segment.as_ref().map_or(0, |segment| segment.max_doc());
        for doc in 0..max_doc {
            self.collect(doc);
        }
    }

    pub fn facet(&self) -> StatisticalFacet {
        StatisticalFacet {
            name: self.facet_name.clone(),
            field_name: self.field_name.clone(),
            min: self.stats.min,
            max: self.stats.max,
            total: self.stats.total,
            sum_of_squares: self.stats.sum_of_squares,
            count: self.stats.count,
        }
    }
}
