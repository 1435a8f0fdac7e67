use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use crate::MapperError;
use crate::document_mapper::{DocumentMapper, IdGenerator, NamedAnalyzer, UuidGenerator};
use crate::field::{FieldMapper, FieldType};
use crate::object::{MapperBuilder, ObjectMapper, ObjectMapperBuilder};
use crate::path::PathType;
use crate::special::{SpecialFieldMapper, SpecialKind};

const SPECIAL_KINDS: [SpecialKind; 7] = [
    SpecialKind::Uid,
    SpecialKind::Id,
    SpecialKind::Type,
    SpecialKind::Index,
    SpecialKind::Source,
    SpecialKind::All,
    SpecialKind::Boost,
];

/// Builds document mappers from mapping definitions.
///
/// A definition is either `{"<type>": {...}}` or, when the type is passed
/// in, the bare body.
#[derive(Debug, Clone)]
pub struct DocumentMapperParser {
    index: String,
    date_detection: bool,
    index_analyzer: NamedAnalyzer,
    search_analyzer: NamedAnalyzer,
    id_generator: Arc<dyn IdGenerator>,
}

impl DocumentMapperParser {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            date_detection: true,
            index_analyzer: NamedAnalyzer::default(),
            search_analyzer: NamedAnalyzer::default(),
            id_generator: Arc::new(UuidGenerator),
        }
    }

    /// Default for definitions that don't set `date_detection`.
    pub fn date_detection(mut self, date_detection: bool) -> Self {
        self.date_detection = date_detection;
        self
    }

    /// Analyzer used for both indexing and search unless a definition
    /// names its own.
    pub fn default_analyzer(mut self, name: impl Into<String>) -> Self {
        let analyzer = NamedAnalyzer::new(name);
        self.index_analyzer = analyzer.clone();
        self.search_analyzer = analyzer;
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn parse(&self, doc_type: Option<&str>, source: &str) -> Result<DocumentMapper, MapperError> {
        let definition: Value = serde_json::from_str(source)
            .map_err(|e| MapperError::MapperParsing(format!("failed to parse mapping definition: {e}")))?;
        let Value::Object(definition) = definition else {
            return Err(MapperError::MapperParsing(
                "mapping definition must be an object".to_string(),
            ));
        };
        let (doc_type, body) = extract_type(doc_type, definition)?;
        trace!(index = %self.index, doc_type = %doc_type, "Parsing mapping definition");

        let mut builder = DocumentMapper::builder(self.index.as_str()).id_generator(self.id_generator.clone());
        let mut root = object_options(ObjectMapper::builder(doc_type.as_str()), &doc_type, &body)?;
        if let Some(properties) = body.get("properties") {
            root = add_properties(root, &doc_type, properties)?;
        }
        builder = builder.root(root.build_root());

        for kind in SPECIAL_KINDS {
            if let Some(options) = body.get(kind.key()) {
                builder = builder.special(special(kind, options)?);
            }
        }

        let mut index_analyzer = self.index_analyzer.clone();
        let mut search_analyzer = self.search_analyzer.clone();
        if let Some(name) = string_option(&body, "analyzer")? {
            index_analyzer = NamedAnalyzer::new(name);
            search_analyzer = NamedAnalyzer::new(name);
        }
        if let Some(name) = string_option(&body, "index_analyzer")? {
            index_analyzer = NamedAnalyzer::new(name);
        }
        if let Some(name) = string_option(&body, "search_analyzer")? {
            search_analyzer = NamedAnalyzer::new(name);
        }
        builder = builder.index_analyzer(index_analyzer).search_analyzer(search_analyzer);

        let date_detection = match body.get("date_detection") {
            Some(value) => node_bool("date_detection", value)?,
            None => self.date_detection,
        };
        builder = builder.date_detection(date_detection);

        match body.get("_attributes") {
            Some(Value::Object(attributes)) => builder = builder.attributes(attributes.clone()),
            Some(_) => {
                return Err(MapperError::MapperParsing(
                    "[_attributes] must be an object".to_string(),
                ));
            }
            None => {}
        }

        builder.build()
    }
}

fn extract_type(doc_type: Option<&str>, definition: Map<String, Value>) -> Result<(String, Map<String, Value>), MapperError> {
    let wrapped = match doc_type {
        Some(doc_type) => definition.len() == 1 && definition.contains_key(doc_type),
        None => definition.len() == 1,
    };
    if !wrapped {
        return match doc_type {
            Some(doc_type) => Ok((doc_type.to_string(), definition)),
            None => Err(MapperError::MapperParsing(
                "mapping definition must hold exactly one type when no type is given".to_string(),
            )),
        };
    }
    let Some((name, body)) = definition.into_iter().next() else {
        return Err(MapperError::MapperParsing("empty mapping definition".to_string()));
    };
    match body {
        Value::Object(body) => Ok((name, body)),
        _ => Err(MapperError::MapperParsing(format!(
            "mapping for type [{name}] must be an object"
        ))),
    }
}

fn object_options(
    mut builder: ObjectMapperBuilder,
    name: &str,
    body: &Map<String, Value>,
) -> Result<ObjectMapperBuilder, MapperError> {
    if let Some(value) = body.get("enabled") {
        builder = builder.enabled(node_bool(name, value)?);
    }
    if let Some(value) = body.get("dynamic") {
        builder = builder.dynamic(node_bool(name, value)?);
    }
    if let Some(path) = string_option(body, "path")? {
        let path_type = PathType::from_name(path)
            .ok_or_else(|| MapperError::MapperParsing(format!("wrong value for path [{path}] on [{name}]")))?;
        builder = builder.path_type(path_type);
    }
    if let Some(value) = body.get("include_in_all") {
        builder = builder.include_in_all(node_bool(name, value)?);
    }
    Ok(builder)
}

fn add_properties(
    mut builder: ObjectMapperBuilder,
    owner: &str,
    properties: &Value,
) -> Result<ObjectMapperBuilder, MapperError> {
    let Value::Object(properties) = properties else {
        return Err(MapperError::MapperParsing(format!(
            "[properties] of [{owner}] must be an object"
        )));
    };
    for (name, definition) in properties {
        builder = builder.add(property(name, definition)?);
    }
    Ok(builder)
}

fn property(name: &str, definition: &Value) -> Result<MapperBuilder, MapperError> {
    let Value::Object(definition) = definition else {
        return Err(MapperError::MapperParsing(format!(
            "mapping for property [{name}] must be an object"
        )));
    };
    let type_name = match string_option(definition, "type")? {
        Some(type_name) => type_name,
        None if definition.contains_key("properties") => "object",
        None => {
            return Err(MapperError::MapperParsing(format!(
                "no type specified for property [{name}]"
            )));
        }
    };

    if type_name == "object" {
        let mut object = object_options(ObjectMapper::builder(name), name, definition)?;
        if let Some(properties) = definition.get("properties") {
            object = add_properties(object, name, properties)?;
        }
        return Ok(object.into());
    }

    let field_type = FieldType::from_name(type_name).ok_or_else(|| {
        MapperError::MapperParsing(format!(
            "no handler for type [{type_name}] declared on field [{name}]"
        ))
    })?;
    let mut field = FieldMapper::builder(name, field_type);
    if let Some(index_name) = string_option(definition, "index_name")? {
        field = field.index_name(index_name);
    }
    if let Some(value) = definition.get("include_in_all") {
        field = field.include_in_all(node_bool(name, value)?);
    }
    if let Some(value) = definition.get("store") {
        field = field.stored(node_bool(name, value)?);
    }
    if let Some(value) = definition.get("index") {
        let indexed = match value {
            Value::String(mode) => mode != "no",
            other => node_bool(name, other)?,
        };
        field = field.indexed(indexed);
    }
    if let Some(value) = definition.get("boost") {
        let boost = value
            .as_f64()
            .ok_or_else(|| MapperError::MapperParsing(format!("[boost] of [{name}] must be a number")))?;
        field = field.boost(boost as f32);
    }
    Ok(field.into())
}

fn special(kind: SpecialKind, options: &Value) -> Result<SpecialFieldMapper, MapperError> {
    let Value::Object(options) = options else {
        return Err(MapperError::MapperParsing(format!(
            "[{}] must be an object",
            kind.key()
        )));
    };
    let mut mapper = SpecialFieldMapper::new(kind);
    if kind == SpecialKind::Boost {
        if let Some(name) = string_option(options, "name")? {
            mapper = mapper.with_name(name);
        }
    }
    if let Some(index_name) = string_option(options, "index_name")? {
        mapper = mapper.with_index_name(index_name);
    }
    if let Some(value) = options.get("enabled") {
        mapper = mapper.with_enabled(node_bool(kind.key(), value)?);
    }
    Ok(mapper)
}

fn string_option<'a>(body: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, MapperError> {
    match body.get(key) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(other) => Err(MapperError::MapperParsing(format!(
            "[{key}] must be a string, found [{other}]"
        ))),
    }
}

/// Lenient boolean: JSON booleans, numbers, and the usual string spellings.
fn node_bool(owner: &str, value: &Value) -> Result<bool, MapperError> {
    match value {
        Value::Bool(value) => Ok(*value),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(text) => Ok(!matches!(text.as_str(), "false" | "0" | "off" | "no")),
        other => Err(MapperError::MapperParsing(format!(
            "expected a boolean on [{owner}], found [{other}]"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Mapper;
    use serde_json::json;

    fn full_definition() -> String {
        json!({
            "tweet": {
                "dynamic": true,
                "path": "full",
                "index_analyzer": "standard",
                "search_analyzer": "whitespace",
                "_attributes": { "owner": "ops" },
                "_index": { "enabled": true },
                "_source": { "enabled": false },
                "_boost": { "name": "priority" },
                "_uid": { "index_name": "uid_field" },
                "properties": {
                    "message": { "type": "string", "store": "yes", "boost": 2.0 },
                    "age": { "type": "integer", "index_name": "user_age", "include_in_all": false },
                    "raw": { "type": "string", "index": "no" },
                    "user": {
                        "type": "object",
                        "path": "just_name",
                        "properties": { "name": { "type": "string" } }
                    },
                    "location": { "properties": { "city": { "type": "string" } } }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn parses_a_full_definition() {
        let mapper = DocumentMapperParser::new("twitter").parse(None, &full_definition()).unwrap();
        assert_eq!(mapper.doc_type(), "tweet");
        assert_eq!(mapper.index(), "twitter");
        assert_eq!(mapper.index_analyzer().name(), "standard");
        assert_eq!(mapper.search_analyzer().name(), "whitespace");
        assert_eq!(mapper.attributes()["owner"], "ops");
        assert!(!mapper.special(SpecialKind::Source).unwrap().enabled());
        assert!(mapper.special(SpecialKind::Index).unwrap().enabled());
        assert_eq!(mapper.special(SpecialKind::Boost).unwrap().name(), "priority");
        assert_eq!(mapper.special(SpecialKind::Uid).unwrap().index_name(), "uid_field");

        let registry = mapper.mappers();
        let message = registry.full_name("message").unwrap();
        assert!(message.stored());
        assert_eq!(message.boost(), 2.0);
        let age = registry.full_name("age").unwrap();
        assert_eq!(age.field_type(), FieldType::Long);
        assert_eq!(age.index_name(), "user_age");
        assert!(!age.include_in_all());
        assert!(!registry.full_name("raw").unwrap().indexed());
        assert_eq!(registry.full_name("user.name").unwrap().index_name(), "name");
        assert!(registry.full_name("location.city").is_some());
        assert!(registry.full_name("priority").is_some());
        assert!(registry.full_name("_index").is_some());
    }

    #[test]
    fn generated_source_round_trips() {
        let parser = DocumentMapperParser::new("twitter");
        let first = parser.parse(None, &full_definition()).unwrap();
        let second = parser.parse(None, &first.mapping_source()).unwrap();

        assert_eq!(*first.root(), *second.root());
        assert_eq!(first.mapping_source(), second.mapping_source());
        let names = |mapper: &DocumentMapper| -> Vec<String> {
            mapper.mappers().iter().map(|m| m.full_name().to_string()).collect()
        };
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.special(SpecialKind::Boost), second.special(SpecialKind::Boost));
        assert_eq!(first.attributes(), second.attributes());
    }

    #[test]
    fn disabled_all_round_trips() {
        let parser = DocumentMapperParser::new("idx");
        let definition = json!({
            "event": {
                "_all": { "enabled": false },
                "properties": { "meta": { "properties": { "source": { "type": "string" } } } }
            }
        })
        .to_string();
        let first = parser.parse(None, &definition).unwrap();
        assert!(first.mappers().iter().all(|m| !m.include_in_all()));
        let second = parser.parse(None, &first.mapping_source()).unwrap();
        assert_eq!(*first.root(), *second.root());
    }

    #[test]
    fn bare_body_uses_the_given_type() {
        let parser = DocumentMapperParser::new("idx").date_detection(false);
        let mapper = parser
            .parse(Some("event"), r#"{"properties": {"name": {"type": "string"}}}"#)
            .unwrap();
        assert_eq!(mapper.doc_type(), "event");
        assert!(!mapper.date_detection());
        assert!(matches!(mapper.root().mapper("name"), Some(Mapper::Field(_))));

        let wrapped = parser
            .parse(Some("event"), r#"{"event": {"date_detection": true}}"#)
            .unwrap();
        assert!(wrapped.date_detection());
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let parser = DocumentMapperParser::new("idx");
        for definition in [
            "not json",
            "[]",
            r#"{"a": {}, "b": {}}"#,
            r#"{"event": {"properties": {"x": {"type": "geo_shape"}}}}"#,
            r#"{"event": {"properties": {"x": {"index_name": "y"}}}}"#,
            r#"{"event": {"path": "sideways"}}"#,
            r#"{"event": {"_attributes": 5}}"#,
        ] {
            let err = parser.parse(None, definition).unwrap_err();
            assert!(matches!(err, MapperError::MapperParsing(_)), "{definition}: {err:?}");
        }
    }
}
