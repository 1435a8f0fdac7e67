use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MapperError;
use crate::document::{Field, FieldValue};
use crate::path::ContentPath;
use crate::token::Token;

/// Value kind held by a leaf mapper.
///
/// Objects are not a field type: they are represented by
/// [`crate::object::Mapper::Object`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Long,
    Double,
    Boolean,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }

    /// Resolves a type name from a mapping definition. Narrower numeric
    /// names collapse onto the two numeric kinds.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" | "text" | "keyword" => Some(FieldType::String),
            "long" | "integer" | "short" | "byte" => Some(FieldType::Long),
            "double" | "float" => Some(FieldType::Double),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            _ => None,
        }
    }

    /// Columnar representation used when this field is loaded into field data.
    pub fn field_data_type(&self) -> FieldDataType {
        match self {
            FieldType::Long | FieldType::Date => FieldDataType::Long,
            FieldType::Double => FieldDataType::Double,
            FieldType::String | FieldType::Boolean => FieldDataType::String,
        }
    }
}

/// Kind of per-segment column a field is materialized into.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldDataType {
    String,
    Long,
    Double,
}

impl FieldDataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldDataType::Long | FieldDataType::Double)
    }
}

/// The three names a field is known by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Names {
    /// Name of the field inside its object, e.g. `city`.
    pub name: String,
    /// Name the values are stored under, e.g. `user.address.city`.
    pub index_name: String,
    /// Dotted path from the root, e.g. `user.address.city`.
    pub full_name: String,
}

/// A leaf schema node. Shared as `Arc<FieldMapper>` and never mutated:
/// changes produce a replacement mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapper {
    names: Names,
    field_type: FieldType,
    /// `index_name` as written in the mapping definition, if any.
    explicit_index_name: Option<String>,
    include_in_all: bool,
    stored: bool,
    indexed: bool,
    boost: f32,
}

impl FieldMapper {
    pub fn builder(name: impl Into<String>, field_type: FieldType) -> FieldMapperBuilder {
        FieldMapperBuilder {
            name: name.into(),
            field_type,
            index_name: None,
            include_in_all: None,
            stored: false,
            indexed: true,
            boost: 1.0,
        }
    }

    pub fn names(&self) -> &Names {
        &self.names
    }

    pub fn name(&self) -> &str {
        &self.names.name
    }

    pub fn index_name(&self) -> &str {
        &self.names.index_name
    }

    pub fn full_name(&self) -> &str {
        &self.names.full_name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn field_data_type(&self) -> FieldDataType {
        self.field_type.field_data_type()
    }

    pub fn include_in_all(&self) -> bool {
        self.include_in_all
    }

    pub fn stored(&self) -> bool {
        self.stored
    }

    pub fn indexed(&self) -> bool {
        self.indexed
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Copy of this mapper with a different catch-all participation.
    pub fn with_include_in_all(&self, include_in_all: bool) -> FieldMapper {
        FieldMapper {
            include_in_all,
            ..self.clone()
        }
    }

    /// Copy of this mapper placed under `path`. An explicit index name is
    /// kept; derived names follow the path and its path type.
    pub(crate) fn relocated(&self, path: &ContentPath) -> FieldMapper {
        let name = &self.names.name;
        FieldMapper {
            names: Names {
                name: name.clone(),
                index_name: path.path_as_text(self.explicit_index_name.as_deref().unwrap_or(name)),
                full_name: path.full_path_as_text(name),
            },
            ..self.clone()
        }
    }

    /// Converts a scalar token into this field's value kind.
    pub fn parse_value(&self, token: &Token) -> Result<FieldValue, MapperError> {
        let value = match (self.field_type, token) {
            (FieldType::String, token) => token.text().map(FieldValue::Text),
            (FieldType::Long, Token::Long(v)) => Some(FieldValue::Long(*v)),
            (FieldType::Long, Token::Double(v)) => Some(FieldValue::Long(*v as i64)),
            (FieldType::Long, Token::String(s)) => s.trim().parse().ok().map(FieldValue::Long),
            (FieldType::Double, Token::Long(v)) => Some(FieldValue::Double(*v as f64)),
            (FieldType::Double, Token::Double(v)) => Some(FieldValue::Double(*v)),
            (FieldType::Double, Token::String(s)) => s.trim().parse().ok().map(FieldValue::Double),
            (FieldType::Boolean, Token::Boolean(b)) => Some(FieldValue::Boolean(*b)),
            (FieldType::Boolean, Token::Long(v)) => Some(FieldValue::Boolean(*v != 0)),
            (FieldType::Boolean, Token::String(s)) => Some(FieldValue::Boolean(!matches!(
                s.as_str(),
                "false" | "0" | "off" | "no"
            ))),
            (FieldType::Date, Token::String(s)) => parse_date(s).map(FieldValue::Date),
            (FieldType::Date, Token::Long(v)) => Some(FieldValue::Date(*v)),
            _ => None,
        };
        value.ok_or_else(|| {
            MapperError::MalformedDocument(format!(
                "failed to parse [{}] as [{}] for field [{}]",
                token,
                self.field_type.as_str(),
                self.names.full_name
            ))
        })
    }

    pub fn create_field(&self, value: FieldValue) -> Field {
        Field {
            name: self.names.index_name.clone(),
            value,
            stored: self.stored,
            indexed: self.indexed,
            boost: self.boost,
        }
    }

    /// Definition of this field as it appears under `properties`.
    /// Only non-default attributes are written.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::from(self.field_type.as_str()));
        if let Some(index_name) = &self.explicit_index_name {
            body.insert("index_name".to_string(), Value::from(index_name.as_str()));
        }
        if !self.include_in_all {
            body.insert("include_in_all".to_string(), Value::Bool(false));
        }
        if self.stored {
            body.insert("store".to_string(), Value::Bool(true));
        }
        if !self.indexed {
            body.insert("index".to_string(), Value::Bool(false));
        }
        if self.boost != 1.0 {
            body.insert("boost".to_string(), Value::from(self.boost as f64));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone)]
pub struct FieldMapperBuilder {
    name: String,
    field_type: FieldType,
    index_name: Option<String>,
    include_in_all: Option<bool>,
    stored: bool,
    indexed: bool,
    boost: f32,
}

impl FieldMapperBuilder {
    pub fn index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn include_in_all(mut self, include_in_all: bool) -> Self {
        self.include_in_all = Some(include_in_all);
        self
    }

    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(self, path: &ContentPath) -> FieldMapper {
        let index_name = path.path_as_text(self.index_name.as_deref().unwrap_or(&self.name));
        let full_name = path.full_path_as_text(&self.name);
        FieldMapper {
            names: Names {
                name: self.name,
                index_name,
                full_name,
            },
            field_type: self.field_type,
            explicit_index_name: self.index_name,
            include_in_all: self.include_in_all.unwrap_or(true),
            stored: self.stored,
            indexed: self.indexed,
            boost: self.boost,
        }
    }
}

/// Parses the date shapes accepted by date fields and by dynamic date
/// detection. Returns milliseconds since the epoch.
pub fn parse_date(text: &str) -> Option<i64> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(text) {
        return Some(date_time.timestamp_millis());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(date_time) = NaiveDateTime::parse_from_str(text, format) {
            return Some(date_time.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_path() {
        let mut path = ContentPath::new();
        path.add("user");
        let mapper = FieldMapper::builder("age", FieldType::Long).build(&path);
        assert_eq!(mapper.name(), "age");
        assert_eq!(mapper.index_name(), "user.age");
        assert_eq!(mapper.full_name(), "user.age");
        assert!(mapper.include_in_all());

        let renamed = FieldMapper::builder("age", FieldType::Long)
            .index_name("user_age")
            .build(&path);
        assert_eq!(renamed.index_name(), "user.user_age");
        assert_eq!(renamed.to_json()["index_name"], "user_age");
    }

    #[test]
    fn parse_value_coerces_compatible_tokens() {
        let path = ContentPath::new();
        let long = FieldMapper::builder("n", FieldType::Long).build(&path);
        assert_eq!(long.parse_value(&Token::String("42".into())).unwrap(), FieldValue::Long(42));
        assert_eq!(long.parse_value(&Token::Double(4.9)).unwrap(), FieldValue::Long(4));
        assert!(matches!(
            long.parse_value(&Token::String("abc".into())),
            Err(MapperError::MalformedDocument(_))
        ));

        let text = FieldMapper::builder("s", FieldType::String).build(&path);
        assert_eq!(text.parse_value(&Token::Long(7)).unwrap(), FieldValue::Text("7".into()));

        let flag = FieldMapper::builder("b", FieldType::Boolean).build(&path);
        assert_eq!(flag.parse_value(&Token::String("off".into())).unwrap(), FieldValue::Boolean(false));
    }

    #[test]
    fn parse_date_accepts_common_shapes() {
        assert_eq!(parse_date("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_date("1970-01-01T00:00:01"), Some(1_000));
        assert_eq!(parse_date("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(parse_date("1970-01-01T00:00:00.250"), Some(250));
        assert_eq!(parse_date("hello"), None);
        assert_eq!(parse_date("2010"), None);
    }

    #[test]
    fn to_json_writes_only_non_defaults() {
        let mapper = FieldMapper::builder("title", FieldType::String).build(&ContentPath::new());
        assert_eq!(mapper.to_json(), serde_json::json!({ "type": "string" }));

        let tuned = FieldMapper::builder("title", FieldType::String)
            .include_in_all(false)
            .stored(true)
            .build(&ContentPath::new());
        assert_eq!(
            tuned.to_json(),
            serde_json::json!({ "type": "string", "include_in_all": false, "store": true })
        );
    }
}
