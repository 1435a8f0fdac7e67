use thiserror::Error;

pub mod context;
pub mod document;
pub mod document_mapper;
pub mod field;
pub mod listener;
pub mod merge;
pub mod object;
mod parse;
pub mod parser;
pub mod path;
pub mod registry;
pub mod special;
pub mod token;

pub use context::{ParseContext, ParsedIdState};
pub use document::{Document, Field, FieldValue, ParsedDocument, TermFilter};
pub use document_mapper::{DocumentMapper, DocumentMapperBuilder, IdGenerator, NamedAnalyzer, UuidGenerator};
pub use field::{FieldDataType, FieldMapper, FieldMapperBuilder, FieldType, Names};
pub use listener::FieldMapperListener;
pub use merge::{MergeContext, MergeFlags, MergeResult};
pub use object::{Mapper, MapperBuilder, ObjectMapper, ObjectMapperBuilder};
pub use parser::DocumentMapperParser;
pub use path::{ContentPath, PathType};
pub use registry::FieldMappers;
pub use special::{SpecialFieldMapper, SpecialKind};
pub use token::{JsonTokenReader, Token, TokenReader};

// --- Domain Errors ---
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapperError {
    /// The document mapper could not be assembled.
    #[error("Invalid mapper configuration: {0}")]
    Configuration(String),
    #[error("Type mismatch, provided type [{provided}] but mapper is of type [{expected}]")]
    TypeMismatch { provided: String, expected: String },
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
    #[error("Failed to read document content: {0}")]
    ParsingIo(String),
    /// The mapping definition itself is invalid.
    #[error("Failed to parse mapping definition: {0}")]
    MapperParsing(String),
    #[error("Failed to generate mapping source: {0}")]
    SourceGeneration(String),
}
