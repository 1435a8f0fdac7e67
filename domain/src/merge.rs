use std::sync::Arc;

use serde::Serialize;

use crate::field::FieldMapper;
use crate::object::{Mapper, ObjectMapper};
use crate::path::ContentPath;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeFlags {
    /// Only compute conflicts; publish nothing.
    pub simulate: bool,
}

impl MergeFlags {
    pub fn simulate(simulate: bool) -> Self {
        Self { simulate }
    }
}

/// Outcome of a merge. Conflicts are data, never errors: the caller decides
/// whether to reject the new mapping or accept the partial merge.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    conflicts: Vec<String>,
}

impl MergeResult {
    pub fn new(conflicts: Vec<String>) -> Self {
        Self { conflicts }
    }

    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Accumulates what a tree merge found and changed.
#[derive(Debug)]
pub struct MergeContext {
    flags: MergeFlags,
    /// Whether merged leaves may take part in the catch-all field.
    all_enabled: bool,
    conflicts: Vec<String>,
    added: Vec<Arc<FieldMapper>>,
    replaced: Vec<Arc<FieldMapper>>,
    /// Path of the object currently being merged into.
    path: ContentPath,
}

impl MergeContext {
    pub fn new(flags: MergeFlags, all_enabled: bool) -> Self {
        Self {
            flags,
            all_enabled,
            conflicts: Vec::new(),
            added: Vec::new(),
            replaced: Vec::new(),
            path: ContentPath::new(),
        }
    }

    pub fn flags(&self) -> MergeFlags {
        self.flags
    }

    pub fn add_conflict(&mut self, conflict: String) {
        self.conflicts.push(conflict);
    }

    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// Leaves that exist only on the incoming side.
    pub fn added(&self) -> &[Arc<FieldMapper>] {
        &self.added
    }

    /// Replacement mappers for leaves whose attributes changed.
    pub fn replaced(&self) -> &[Arc<FieldMapper>] {
        &self.replaced
    }

    pub fn into_result(self) -> MergeResult {
        MergeResult::new(self.conflicts)
    }
}

impl ObjectMapper {
    /// Merges `other` into this tree, matching children by name.
    ///
    /// Conflicting children keep their current definition. Callers that must
    /// not publish anything run this on a copy. Incoming leaves are named by
    /// where they land in this tree, not by the tree they came from.
    pub fn merge(&mut self, other: &ObjectMapper, context: &mut MergeContext) {
        if context.path.elements().is_empty() {
            context.path.set_path_type(self.path_type);
        }
        if !context.flags.simulate {
            self.dynamic = other.dynamic;
        }
        for (name, incoming) in &other.mappers {
            match self.mappers.get_mut(name) {
                None => {
                    let addition = restrict_all(&incoming.relocated(&mut context.path), context.all_enabled);
                    addition.traverse(&mut |field: &Arc<FieldMapper>| context.added.push(field.clone()));
                    self.mappers.insert(name.clone(), addition);
                }
                Some(Mapper::Object(existing)) => match incoming {
                    Mapper::Object(incoming) => {
                        let previous_path_type = context.path.path_type();
                        context.path.add(name);
                        context.path.set_path_type(existing.path_type);
                        existing.merge(incoming, context);
                        context.path.set_path_type(previous_path_type);
                        context.path.remove();
                    }
                    Mapper::Field(field) => context.add_conflict(format!(
                        "can't merge a non object mapping [{}] with an object mapping [{}]",
                        field.full_name(),
                        existing.full_path()
                    )),
                },
                Some(Mapper::Field(existing)) => match incoming {
                    Mapper::Field(incoming) => {
                        let incoming = Arc::new(incoming.relocated(&context.path));
                        merge_field(existing, &incoming, context)
                    }
                    Mapper::Object(object) => context.add_conflict(format!(
                        "can't merge an object mapping [{}] with a non object mapping [{}]",
                        object.full_path(),
                        existing.full_name()
                    )),
                },
            }
        }
    }
}

fn merge_field(existing: &mut Arc<FieldMapper>, incoming: &Arc<FieldMapper>, context: &mut MergeContext) {
    if existing.field_type() != incoming.field_type() {
        context.add_conflict(format!(
            "mapper [{}] of different type, current_type [{}], merged_type [{}]",
            existing.full_name(),
            existing.field_type().as_str(),
            incoming.field_type().as_str()
        ));
        return;
    }
    if existing.index_name() != incoming.index_name() {
        context.add_conflict(format!(
            "mapper [{}] has different index_name, current [{}], merged [{}]",
            existing.full_name(),
            existing.index_name(),
            incoming.index_name()
        ));
        return;
    }
    let include_in_all = incoming.include_in_all() && context.all_enabled;
    if existing.include_in_all() != include_in_all {
        let replacement = Arc::new(existing.with_include_in_all(include_in_all));
        context.replaced.push(replacement.clone());
        *existing = replacement;
    }
}

fn restrict_all(mapper: &Mapper, all_enabled: bool) -> Mapper {
    if all_enabled {
        return mapper.clone();
    }
    match mapper {
        Mapper::Field(field) if field.include_in_all() => {
            Mapper::Field(Arc::new(field.with_include_in_all(false)))
        }
        Mapper::Field(field) => Mapper::Field(field.clone()),
        Mapper::Object(object) => {
            let mut object = object.clone();
            object.include_in_all(false);
            Mapper::Object(object)
        }
    }
}
