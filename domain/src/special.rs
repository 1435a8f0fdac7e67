use std::sync::Arc;

use serde_json::{Map, Value};

use crate::document::{Field, FieldValue};
use crate::field::{FieldMapper, FieldType};
use crate::path::ContentPath;

/// The built-in mappers every document type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    Uid,
    Id,
    Type,
    Index,
    Source,
    All,
    Boost,
}

impl SpecialKind {
    /// Key of this mapper in a mapping definition.
    pub fn key(&self) -> &'static str {
        match self {
            SpecialKind::Uid => "_uid",
            SpecialKind::Id => "_id",
            SpecialKind::Type => "_type",
            SpecialKind::Index => "_index",
            SpecialKind::Source => "_source",
            SpecialKind::All => "_all",
            SpecialKind::Boost => "_boost",
        }
    }

    fn default_enabled(&self) -> bool {
        !matches!(self, SpecialKind::Index)
    }

    fn field_type(&self) -> FieldType {
        match self {
            SpecialKind::Boost => FieldType::Double,
            _ => FieldType::String,
        }
    }

    fn stored(&self) -> bool {
        matches!(self, SpecialKind::Uid | SpecialKind::Source | SpecialKind::Index)
    }

    fn indexed(&self) -> bool {
        !matches!(self, SpecialKind::Source)
    }
}

/// A built-in mapper: a field mapper plus an `enabled` switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialFieldMapper {
    kind: SpecialKind,
    enabled: bool,
    field: Arc<FieldMapper>,
}

impl SpecialFieldMapper {
    pub fn new(kind: SpecialKind) -> Self {
        Self::build(kind, kind.default_enabled(), kind.key(), None)
    }

    fn build(kind: SpecialKind, enabled: bool, name: &str, index_name: Option<&str>) -> Self {
        let mut builder = FieldMapper::builder(name, kind.field_type())
            .include_in_all(false)
            .stored(kind.stored())
            .indexed(kind.indexed());
        if let Some(index_name) = index_name {
            builder = builder.index_name(index_name);
        }
        Self {
            kind,
            enabled,
            field: Arc::new(builder.build(&ContentPath::new())),
        }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    /// Renames the field. Only meaningful for `_boost`, whose name is the
    /// body field it reads.
    pub fn with_name(self, name: &str) -> Self {
        Self::build(self.kind, self.enabled, name, self.explicit_index_name().as_deref())
    }

    pub fn with_index_name(self, index_name: &str) -> Self {
        Self::build(self.kind, self.enabled, self.field.name(), Some(index_name))
    }

    pub fn kind(&self) -> SpecialKind {
        self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn field_mapper(&self) -> &Arc<FieldMapper> {
        &self.field
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn index_name(&self) -> &str {
        self.field.index_name()
    }

    fn explicit_index_name(&self) -> Option<String> {
        (self.field.index_name() != self.field.name()).then(|| self.field.index_name().to_string())
    }

    pub fn create_field(&self, value: FieldValue) -> Field {
        self.field.create_field(value)
    }

    /// Definition body, or `None` when every attribute is at its default.
    pub fn to_json(&self) -> Option<Value> {
        let mut body = Map::new();
        if self.enabled != self.kind.default_enabled() {
            body.insert("enabled".to_string(), Value::Bool(self.enabled));
        }
        if self.kind == SpecialKind::Boost && self.field.name() != self.kind.key() {
            body.insert("name".to_string(), Value::from(self.field.name()));
        }
        if let Some(index_name) = self.explicit_index_name() {
            body.insert("index_name".to_string(), Value::from(index_name));
        }
        (!body.is_empty()).then_some(Value::Object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_kind() {
        let index = SpecialFieldMapper::new(SpecialKind::Index);
        assert!(!index.enabled());
        assert_eq!(index.to_json(), None);

        let source = SpecialFieldMapper::new(SpecialKind::Source);
        assert!(source.enabled());
        assert!(source.field_mapper().stored());
        assert!(!source.field_mapper().indexed());
        assert!(!source.field_mapper().include_in_all());

        let boost = SpecialFieldMapper::new(SpecialKind::Boost);
        assert_eq!(boost.name(), "_boost");
        assert_eq!(boost.field_mapper().field_type(), FieldType::Double);
    }

    #[test]
    fn non_defaults_are_serialized() {
        let all = SpecialFieldMapper::new(SpecialKind::All).with_enabled(false);
        assert_eq!(all.to_json(), Some(serde_json::json!({ "enabled": false })));

        let boost = SpecialFieldMapper::new(SpecialKind::Boost).with_name("my_boost");
        assert_eq!(boost.name(), "my_boost");
        assert_eq!(boost.to_json(), Some(serde_json::json!({ "name": "my_boost" })));

        let uid = SpecialFieldMapper::new(SpecialKind::Uid).with_index_name("uid_field");
        assert_eq!(uid.index_name(), "uid_field");
        assert_eq!(uid.to_json(), Some(serde_json::json!({ "index_name": "uid_field" })));
    }
}
