use std::fmt;

use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use serde_json::error::Category;

use crate::MapperError;

/// One structural or scalar event of a document body.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName(String),
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Null,
}

impl Token {
    /// Textual form of a scalar token.
    pub fn text(&self) -> Option<String> {
        match self {
            Token::String(s) => Some(s.clone()),
            Token::Long(v) => Some(v.to_string()),
            Token::Double(v) => Some(v.to_string()),
            Token::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::StartObject => f.write_str("{"),
            Token::EndObject => f.write_str("}"),
            Token::StartArray => f.write_str("["),
            Token::EndArray => f.write_str("]"),
            Token::FieldName(name) => write!(f, "field name {name}"),
            Token::String(s) => f.write_str(s),
            Token::Long(v) => write!(f, "{v}"),
            Token::Double(v) => write!(f, "{v}"),
            Token::Boolean(b) => write!(f, "{b}"),
            Token::Null => f.write_str("null"),
        }
    }
}

/// Pull-style reader over the tokens of a document body.
pub trait TokenReader {
    /// Advances to the next token. `None` once the content is exhausted.
    fn next_token(&mut self) -> Option<Token>;

    fn current_token(&self) -> Option<&Token>;

    /// Skips to the end of the object or array the reader is positioned on.
    fn skip_children(&mut self) {
        if !matches!(
            self.current_token(),
            Some(Token::StartObject) | Some(Token::StartArray)
        ) {
            return;
        }
        let mut open = 1usize;
        while let Some(token) = self.next_token() {
            match token {
                Token::StartObject | Token::StartArray => open += 1,
                Token::EndObject | Token::EndArray => {
                    open -= 1;
                    if open == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Token reader for JSON bodies.
///
/// The body is tokenized up front into a buffer handed in by the caller;
/// [`JsonTokenReader::close`] gives that buffer back, emptied, so it can be
/// reused for the next document.
#[derive(Debug, Default)]
pub struct JsonTokenReader {
    tokens: Vec<Token>,
    position: usize,
}

impl JsonTokenReader {
    pub fn with_buffer(mut buffer: Vec<Token>) -> Self {
        buffer.clear();
        Self {
            tokens: buffer,
            position: 0,
        }
    }

    /// Tokenizes `source`. Syntax errors are reported as malformed content,
    /// failures of the underlying reader as I/O errors.
    pub fn load(&mut self, source: &[u8]) -> Result<(), MapperError> {
        self.tokens.clear();
        self.position = 0;

        let mut deserializer = serde_json::Deserializer::from_slice(source);
        TokenSink(&mut self.tokens)
            .deserialize(&mut deserializer)
            .and_then(|()| deserializer.end())
            .map_err(|e| {
                self.tokens.clear();
                match e.classify() {
                    Category::Io => MapperError::ParsingIo(e.to_string()),
                    _ => MapperError::MalformedDocument(format!("failed to read content: {e}")),
                }
            })
    }

    /// Releases the reader, returning its (emptied) token buffer.
    pub fn close(mut self) -> Vec<Token> {
        self.tokens.clear();
        self.tokens
    }
}

impl TokenReader for JsonTokenReader {
    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn current_token(&self) -> Option<&Token> {
        self.position.checked_sub(1).and_then(|i| self.tokens.get(i))
    }
}

/// Streams a JSON value into a flat token buffer, preserving key order.
struct TokenSink<'a>(&'a mut Vec<Token>);

impl<'de> DeserializeSeed<'de> for TokenSink<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for TokenSink<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<(), E> {
        self.0.push(Token::Boolean(v));
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<(), E> {
        self.0.push(Token::Long(v));
        Ok(())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<(), E> {
        match i64::try_from(v) {
            Ok(v) => self.0.push(Token::Long(v)),
            Err(_) => self.0.push(Token::Double(v as f64)),
        }
        Ok(())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<(), E> {
        self.0.push(Token::Double(v));
        Ok(())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<(), E> {
        self.0.push(Token::String(v.to_string()));
        Ok(())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<(), E> {
        self.0.push(Token::String(v));
        Ok(())
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        self.0.push(Token::Null);
        Ok(())
    }

    fn visit_none<E: de::Error>(self) -> Result<(), E> {
        self.0.push(Token::Null);
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let tokens = self.0;
        tokens.push(Token::StartArray);
        while seq.next_element_seed(TokenSink(&mut *tokens))?.is_some() {}
        tokens.push(Token::EndArray);
        Ok(())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let tokens = self.0;
        tokens.push(Token::StartObject);
        while let Some(key) = map.next_key::<String>()? {
            tokens.push(Token::FieldName(key));
            map.next_value_seed(TokenSink(&mut *tokens))?;
        }
        tokens.push(Token::EndObject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(source: &str) -> Vec<Token> {
        let mut reader = JsonTokenReader::with_buffer(Vec::new());
        reader.load(source.as_bytes()).unwrap();
        let mut tokens = Vec::new();
        while let Some(token) = reader.next_token() {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn tokens_keep_document_order() {
        let tokens = read_all(r#"{"b": 1, "a": [true, null, "x"], "c": {"d": 1.5}}"#);
        assert_eq!(
            tokens,
            vec![
                Token::StartObject,
                Token::FieldName("b".into()),
                Token::Long(1),
                Token::FieldName("a".into()),
                Token::StartArray,
                Token::Boolean(true),
                Token::Null,
                Token::String("x".into()),
                Token::EndArray,
                Token::FieldName("c".into()),
                Token::StartObject,
                Token::FieldName("d".into()),
                Token::Double(1.5),
                Token::EndObject,
                Token::EndObject,
            ]
        );
    }

    #[test]
    fn skip_children_stops_after_matching_end() {
        let mut reader = JsonTokenReader::with_buffer(Vec::new());
        reader.load(br#"{"a": {"b": [1, {"c": 2}]}, "z": 1}"#).unwrap();
        reader.next_token();
        reader.next_token();
        assert_eq!(reader.next_token(), Some(Token::StartObject));
        reader.skip_children();
        assert_eq!(reader.current_token(), Some(&Token::EndObject));
        assert_eq!(reader.next_token(), Some(Token::FieldName("z".into())));
    }

    #[test]
    fn load_reports_malformed_content_and_close_returns_buffer() {
        let mut reader = JsonTokenReader::with_buffer(Vec::with_capacity(64));
        let err = reader.load(br#"{"a": "#).unwrap_err();
        assert!(matches!(err, MapperError::MalformedDocument(_)));

        let buffer = reader.close();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 64);
    }
}
