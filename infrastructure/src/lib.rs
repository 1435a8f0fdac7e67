// Module declarations
pub mod persistence;
pub mod search;

// Re-export all implementations
pub use persistence::InMemoryMappingRepository;
pub use search::{ColumnarNumericFieldData, InMemoryFieldDataCache, InMemoryIndex, InMemorySegment};
