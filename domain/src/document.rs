use std::sync::Arc;

use serde::Serialize;

use crate::field::FieldMapper;

/// A single value produced for the index.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    /// Milliseconds since the epoch.
    Date(i64),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Numeric view used when loading columnar field data.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Long(v) | FieldValue::Date(v) => Some(*v as f64),
            FieldValue::Double(v) => Some(*v),
            FieldValue::Text(s) => s.parse().ok(),
            FieldValue::Boolean(_) | FieldValue::Binary(_) => None,
        }
    }

    /// Textual form fed into the catch-all field and term comparisons.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Long(v) | FieldValue::Date(v) => Some(v.to_string()),
            FieldValue::Double(v) => Some(v.to_string()),
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Binary(_) => None,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Field {
    /// Index name of the mapper that produced this field.
    pub name: String,
    pub value: FieldValue,
    pub stored: bool,
    pub indexed: bool,
    pub boost: f32,
}

/// The flat field representation of one parsed document.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Document {
    fields: Vec<Field>,
    boost: f32,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            boost: 1.0,
        }
    }
}

impl Document {
    pub fn add(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// All fields stored under `name`, in the order they were produced.
    pub fn get_fields<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |field| field.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    pub(crate) fn clear(&mut self) {
        self.fields.clear();
        self.boost = 1.0;
    }
}

/// Immutable result of one parse call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub uid: String,
    pub id: String,
    pub doc_type: String,
    pub doc: Document,
    pub source: Vec<u8>,
    /// Field mappers this parse registered; empty on a stable schema.
    pub mappers_added: Vec<Arc<FieldMapper>>,
}

/// Equality filter on one indexed term, e.g. `_type == "tweet"`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermFilter {
    pub field: String,
    pub term: String,
}

impl TermFilter {
    pub fn new(field: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            term: term.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.get_fields(&self.field)
            .any(|field| field.value.to_text().as_deref() == Some(self.term.as_str()))
    }
}
