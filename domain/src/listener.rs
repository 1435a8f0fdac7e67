use std::sync::Arc;

use crate::field::FieldMapper;

/// Notified, synchronously and in registration order, whenever a document
/// mapper registers a new field mapper.
///
/// Notifications are delivered while the mapper holds its write lock, which
/// is not reentrant. A listener must not call back into the same mapper
/// (`parse`, `merge`, `add_field_mapper_listener`); doing so deadlocks.
/// Hand the mapper off to another thread instead.
pub trait FieldMapperListener: Send + Sync {
    fn field_mapper(&self, mapper: &Arc<FieldMapper>);
}

impl<F> FieldMapperListener for F
where
    F: Fn(&Arc<FieldMapper>) + Send + Sync,
{
    fn field_mapper(&self, mapper: &Arc<FieldMapper>) {
        self(mapper)
    }
}
