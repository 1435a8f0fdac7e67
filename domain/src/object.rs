use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::field::{FieldMapper, FieldMapperBuilder};
use crate::path::{ContentPath, PathType};

/// A node of the mapper tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapper {
    Field(Arc<FieldMapper>),
    Object(ObjectMapper),
}

impl Mapper {
    pub fn name(&self) -> &str {
        match self {
            Mapper::Field(field) => field.name(),
            Mapper::Object(object) => object.name(),
        }
    }

    /// Calls `visitor` for every leaf at or below this node, depth first.
    pub fn traverse<F: FnMut(&Arc<FieldMapper>)>(&self, visitor: &mut F) {
        match self {
            Mapper::Field(field) => visitor(field),
            Mapper::Object(object) => object.traverse(visitor),
        }
    }

    /// This subtree with every name recomputed for its place under `path`.
    pub(crate) fn relocated(&self, path: &mut ContentPath) -> Mapper {
        match self {
            Mapper::Field(field) => Mapper::Field(Arc::new(field.relocated(path))),
            Mapper::Object(object) => {
                let full_path = path.full_path_as_text(&object.name);
                let previous_path_type = path.path_type();
                path.add(&object.name);
                path.set_path_type(object.path_type);
                let mappers = object
                    .mappers
                    .iter()
                    .map(|(name, child)| (name.clone(), child.relocated(path)))
                    .collect();
                path.set_path_type(previous_path_type);
                path.remove();
                Mapper::Object(ObjectMapper {
                    name: object.name.clone(),
                    full_path,
                    enabled: object.enabled,
                    dynamic: object.dynamic,
                    path_type: object.path_type,
                    include_in_all: object.include_in_all,
                    mappers,
                })
            }
        }
    }
}

/// A composite node: a named set of child mappers.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMapper {
    name: String,
    full_path: String,
    pub(crate) enabled: bool,
    pub(crate) dynamic: bool,
    pub(crate) path_type: PathType,
    /// Catch-all override applied to every descendant.
    pub(crate) include_in_all: Option<bool>,
    pub(crate) mappers: BTreeMap<String, Mapper>,
}

impl ObjectMapper {
    pub fn builder(name: impl Into<String>) -> ObjectMapperBuilder {
        ObjectMapperBuilder {
            name: name.into(),
            enabled: true,
            dynamic: true,
            path_type: PathType::Full,
            include_in_all: None,
            children: Vec::new(),
        }
    }

    /// An empty, dynamic object created while parsing a previously unseen object.
    pub(crate) fn dynamic(name: &str, path: &ContentPath, include_in_all: Option<bool>) -> Self {
        Self {
            name: name.to_string(),
            full_path: path.full_path_as_text(name),
            enabled: true,
            dynamic: true,
            path_type: PathType::Full,
            include_in_all,
            mappers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path from the root; empty for the root object itself.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn path_type(&self) -> PathType {
        self.path_type
    }

    pub fn include_in_all_override(&self) -> Option<bool> {
        self.include_in_all
    }

    pub fn mapper(&self, name: &str) -> Option<&Mapper> {
        self.mappers.get(name)
    }

    pub fn mappers(&self) -> impl Iterator<Item = &Mapper> {
        self.mappers.values()
    }

    pub fn put_mapper(&mut self, mapper: Mapper) {
        self.mappers.insert(mapper.name().to_string(), mapper);
    }

    /// Calls `visitor` for every leaf below this object, depth first.
    pub fn traverse<F: FnMut(&Arc<FieldMapper>)>(&self, visitor: &mut F) {
        for mapper in self.mappers.values() {
            mapper.traverse(visitor);
        }
    }

    /// Forces catch-all participation of this object and all descendants.
    pub fn include_in_all(&mut self, include_in_all: bool) {
        self.include_in_all = Some(include_in_all);
        for mapper in self.mappers.values_mut() {
            match mapper {
                Mapper::Field(field) => {
                    if field.include_in_all() != include_in_all {
                        *field = Arc::new(field.with_include_in_all(include_in_all));
                    }
                }
                Mapper::Object(object) => object.include_in_all(include_in_all),
            }
        }
    }

    /// The object reached by following `path` from this object.
    pub fn object_at(&self, path: &[String]) -> Option<&ObjectMapper> {
        let mut object = self;
        for name in path {
            match object.mappers.get(name) {
                Some(Mapper::Object(child)) => object = child,
                _ => return None,
            }
        }
        Some(object)
    }

    pub fn object_at_mut(&mut self, path: &[String]) -> Option<&mut ObjectMapper> {
        let mut object = self;
        for name in path {
            match object.mappers.get_mut(name) {
                Some(Mapper::Object(child)) => object = child,
                _ => return None,
            }
        }
        Some(object)
    }

    /// Definition body of this object: attributes that differ from the
    /// defaults plus `properties`. `skip` names root-level children that are
    /// serialized elsewhere.
    pub fn to_json(&self, skip: &[&str]) -> Map<String, Value> {
        let mut body = Map::new();
        if !self.enabled {
            body.insert("enabled".to_string(), Value::Bool(false));
        }
        if !self.dynamic {
            body.insert("dynamic".to_string(), Value::Bool(false));
        }
        if self.path_type != PathType::Full {
            body.insert("path".to_string(), Value::from(self.path_type.as_str()));
        }
        if let Some(include_in_all) = self.include_in_all {
            body.insert("include_in_all".to_string(), Value::Bool(include_in_all));
        }
        let mut properties = Map::new();
        for (name, mapper) in &self.mappers {
            if skip.contains(&name.as_str()) {
                continue;
            }
            let definition = match mapper {
                Mapper::Field(field) => field.to_json(),
                Mapper::Object(object) => {
                    let mut child = Map::new();
                    child.insert("type".to_string(), Value::from("object"));
                    child.extend(object.to_json(&[]));
                    Value::Object(child)
                }
            };
            properties.insert(name.clone(), definition);
        }
        if !properties.is_empty() {
            body.insert("properties".to_string(), Value::Object(properties));
        }
        body
    }
}

/// Builder for either kind of mapper node.
#[derive(Debug, Clone)]
pub enum MapperBuilder {
    Field(FieldMapperBuilder),
    Object(ObjectMapperBuilder),
}

impl MapperBuilder {
    fn build(self, path: &mut ContentPath) -> Mapper {
        match self {
            MapperBuilder::Field(field) => Mapper::Field(Arc::new(field.build(path))),
            MapperBuilder::Object(object) => Mapper::Object(object.build(path)),
        }
    }
}

impl From<FieldMapperBuilder> for MapperBuilder {
    fn from(builder: FieldMapperBuilder) -> Self {
        MapperBuilder::Field(builder)
    }
}

impl From<ObjectMapperBuilder> for MapperBuilder {
    fn from(builder: ObjectMapperBuilder) -> Self {
        MapperBuilder::Object(builder)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectMapperBuilder {
    name: String,
    enabled: bool,
    dynamic: bool,
    path_type: PathType,
    include_in_all: Option<bool>,
    children: Vec<MapperBuilder>,
}

impl ObjectMapperBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn path_type(mut self, path_type: PathType) -> Self {
        self.path_type = path_type;
        self
    }

    pub fn include_in_all(mut self, include_in_all: bool) -> Self {
        self.include_in_all = Some(include_in_all);
        self
    }

    pub fn add(mut self, child: impl Into<MapperBuilder>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Builds the root object of a type. The root's own name is not part of
    /// its children's paths.
    pub fn build_root(self) -> ObjectMapper {
        let mut path = ContentPath::new();
        path.set_path_type(self.path_type);
        let mut root = ObjectMapper {
            name: self.name,
            full_path: String::new(),
            enabled: self.enabled,
            dynamic: self.dynamic,
            path_type: self.path_type,
            include_in_all: None,
            mappers: BTreeMap::new(),
        };
        for child in self.children {
            root.put_mapper(child.build(&mut path));
        }
        if let Some(include_in_all) = self.include_in_all {
            root.include_in_all(include_in_all);
        }
        root
    }

    pub fn build(self, path: &mut ContentPath) -> ObjectMapper {
        let full_path = path.full_path_as_text(&self.name);
        let previous_path_type = path.path_type();
        path.add(&self.name);
        path.set_path_type(self.path_type);
        let mut object = ObjectMapper {
            name: self.name,
            full_path,
            enabled: self.enabled,
            dynamic: self.dynamic,
            path_type: self.path_type,
            include_in_all: None,
            mappers: BTreeMap::new(),
        };
        for child in self.children {
            object.put_mapper(child.build(path));
        }
        path.set_path_type(previous_path_type);
        path.remove();
        if let Some(include_in_all) = self.include_in_all {
            object.include_in_all(include_in_all);
        }
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn person() -> ObjectMapper {
        ObjectMapper::builder("person")
            .add(FieldMapper::builder("name", FieldType::String))
            .add(
                ObjectMapper::builder("address")
                    .add(FieldMapper::builder("city", FieldType::String))
                    .add(FieldMapper::builder("zip", FieldType::Long)),
            )
            .add(
                ObjectMapper::builder("meta")
                    .path_type(PathType::JustName)
                    .add(FieldMapper::builder("source", FieldType::String)),
            )
            .build_root()
    }

    #[test]
    fn traverse_visits_every_leaf_once() {
        let root = person();
        let mut seen = Vec::new();
        root.traverse(&mut |field: &Arc<FieldMapper>| seen.push(field.full_name().to_string()));
        seen.sort();
        assert_eq!(seen, vec!["address.city", "address.zip", "meta.source", "name"]);
    }

    #[test]
    fn path_type_controls_index_names() {
        let root = person();
        let Some(Mapper::Field(source)) = root.object_at(&["meta".to_string()]).and_then(|o| o.mapper("source")) else {
            panic!("meta.source missing");
        };
        assert_eq!(source.index_name(), "source");
        assert_eq!(source.full_name(), "meta.source");

        let Some(Mapper::Field(city)) = root
            .object_at(&["address".to_string()])
            .and_then(|o| o.mapper("city"))
        else {
            panic!("address.city missing");
        };
        assert_eq!(city.index_name(), "address.city");
    }

    #[test]
    fn include_in_all_propagates_to_descendants() {
        let mut root = person();
        root.include_in_all(false);
        let mut included = 0;
        root.traverse(&mut |field: &Arc<FieldMapper>| {
            if field.include_in_all() {
                included += 1;
            }
        });
        assert_eq!(included, 0);
        assert_eq!(
            root.object_at(&["address".to_string()]).unwrap().include_in_all_override(),
            Some(false)
        );
    }

    #[test]
    fn to_json_skips_defaults_and_listed_names() {
        let mut root = person();
        root.put_mapper(Mapper::Field(Arc::new(
            FieldMapper::builder("_id", FieldType::String).build(&ContentPath::new()),
        )));
        let json = Value::Object(root.to_json(&["_id"]));
        assert!(json["properties"].get("_id").is_none());
        assert_eq!(json["properties"]["address"]["type"], "object");
        assert_eq!(json["properties"]["meta"]["path"], "just_name");
        assert_eq!(json["properties"]["address"]["properties"]["zip"]["type"], "long");
    }
}
