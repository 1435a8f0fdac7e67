use std::collections::HashMap;
use std::sync::Arc;

use crate::field::FieldMapper;

/// Flat, immutable snapshot of every field mapper a document type knows.
///
/// A snapshot is never modified: [`FieldMappers::concat`] returns a new one.
/// Each mapper is held once, keyed by its full name.
#[derive(Debug, Clone, Default)]
pub struct FieldMappers {
    mappers: Vec<Arc<FieldMapper>>,
    by_full_name: HashMap<String, Arc<FieldMapper>>,
    by_name: HashMap<String, Vec<Arc<FieldMapper>>>,
    by_index_name: HashMap<String, Vec<Arc<FieldMapper>>>,
}

impl FieldMappers {
    pub fn new(mappers: impl IntoIterator<Item = Arc<FieldMapper>>) -> Self {
        Self::default().concat(mappers)
    }

    /// New snapshot holding these mappers plus `mappers`. A mapper with the
    /// same full name as an existing one replaces it in place.
    pub fn concat(&self, mappers: impl IntoIterator<Item = Arc<FieldMapper>>) -> Self {
        let mut list = self.mappers.clone();
        let mut positions: HashMap<String, usize> = list
            .iter()
            .enumerate()
            .map(|(i, m)| (m.full_name().to_string(), i))
            .collect();
        for mapper in mappers {
            match positions.get(mapper.full_name()) {
                Some(&i) => list[i] = mapper,
                None => {
                    positions.insert(mapper.full_name().to_string(), list.len());
                    list.push(mapper);
                }
            }
        }
        Self::index(list)
    }

    fn index(mappers: Vec<Arc<FieldMapper>>) -> Self {
        let mut by_full_name = HashMap::with_capacity(mappers.len());
        let mut by_name: HashMap<String, Vec<Arc<FieldMapper>>> = HashMap::new();
        let mut by_index_name: HashMap<String, Vec<Arc<FieldMapper>>> = HashMap::new();
        for mapper in &mappers {
            by_full_name.insert(mapper.full_name().to_string(), mapper.clone());
            by_name
                .entry(mapper.name().to_string())
                .or_default()
                .push(mapper.clone());
            by_index_name
                .entry(mapper.index_name().to_string())
                .or_default()
                .push(mapper.clone());
        }
        Self {
            mappers,
            by_full_name,
            by_name,
            by_index_name,
        }
    }

    pub fn full_name(&self, full_name: &str) -> Option<&Arc<FieldMapper>> {
        self.by_full_name.get(full_name)
    }

    /// First mapper whose leaf name is `name`.
    pub fn name(&self, name: &str) -> Option<&Arc<FieldMapper>> {
        self.by_name.get(name).and_then(|mappers| mappers.first())
    }

    pub fn index_name(&self, index_name: &str) -> Option<&Arc<FieldMapper>> {
        self.by_index_name
            .get(index_name)
            .and_then(|mappers| mappers.first())
    }

    /// Resolves `name` as a full name, then a leaf name, then an index name.
    pub fn smart_name(&self, name: &str) -> Option<&Arc<FieldMapper>> {
        self.full_name(name)
            .or_else(|| self.name(name))
            .or_else(|| self.index_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FieldMapper>> {
        self.mappers.iter()
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::path::{ContentPath, PathType};

    fn field(name: &str, field_type: FieldType) -> Arc<FieldMapper> {
        Arc::new(FieldMapper::builder(name, field_type).build(&ContentPath::new()))
    }

    #[test]
    fn concat_returns_a_new_snapshot() {
        let first = FieldMappers::new([field("age", FieldType::Long)]);
        let second = first.concat([field("name", FieldType::String)]);

        assert_eq!(first.len(), 1);
        assert!(first.full_name("name").is_none());
        assert_eq!(second.len(), 2);
        assert!(second.full_name("name").is_some());
    }

    #[test]
    fn same_full_name_replaces() {
        let first = FieldMappers::new([field("age", FieldType::Long), field("name", FieldType::String)]);
        let replacement = Arc::new(
            FieldMapper::builder("age", FieldType::Long)
                .include_in_all(false)
                .build(&ContentPath::new()),
        );
        let second = first.concat([replacement.clone()]);

        assert_eq!(second.len(), 2);
        assert!(Arc::ptr_eq(second.full_name("age").unwrap(), &replacement));
        assert_eq!(second.iter().next().unwrap().name(), "age");
    }

    #[test]
    fn smart_name_falls_back_to_index_name() {
        let mut path = ContentPath::new();
        path.add("user");
        path.set_path_type(PathType::Full);
        let nested = Arc::new(
            FieldMapper::builder("age", FieldType::Long)
                .index_name("years")
                .build(&path),
        );
        let mappers = FieldMappers::new([nested]);

        assert_eq!(mappers.smart_name("user.age").unwrap().index_name(), "user.years");
        assert_eq!(mappers.smart_name("age").unwrap().full_name(), "user.age");
        assert_eq!(mappers.smart_name("user.years").unwrap().full_name(), "user.age");
        assert!(mappers.smart_name("years").is_none());
    }
}
