pub mod field_data_cache;
pub mod in_memory_index;

pub use field_data_cache::{ColumnarNumericFieldData, InMemoryFieldDataCache};
pub use in_memory_index::{InMemoryIndex, InMemorySegment};
