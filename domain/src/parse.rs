use std::sync::Arc;

use tracing::{debug, trace};

use crate::MapperError;
use crate::context::{ParseContext, ParsedIdState};
use crate::document::{FieldValue, ParsedDocument};
use crate::document_mapper::DocumentMapper;
use crate::field::{FieldMapper, FieldType, parse_date};
use crate::object::{Mapper, ObjectMapper};
use crate::path::PathType;
use crate::special::SpecialKind;
use crate::token::{JsonTokenReader, Token, TokenReader};

/// What a root-level body field with a reserved name does.
enum RootField {
    Id,
    Boost,
    /// Reserved for a special mapper that is never read from the body.
    Ignored,
}

impl DocumentMapper {
    /// Parses a document without an explicit type or id.
    pub fn parse_source(&self, source: &[u8]) -> Result<ParsedDocument, MapperError> {
        self.parse(None, None, source)
    }

    /// Parses `source` into a flat document, registering any field the
    /// mapping does not know yet.
    ///
    /// `doc_type`, when given, must be this mapper's type. `id`, when given,
    /// must agree with an `_id` field in the body.
    pub fn parse(&self, doc_type: Option<&str>, id: Option<&str>, source: &[u8]) -> Result<ParsedDocument, MapperError> {
        if let Some(doc_type) = doc_type {
            if doc_type != self.doc_type() {
                return Err(MapperError::TypeMismatch {
                    provided: doc_type.to_string(),
                    expected: self.doc_type().to_string(),
                });
            }
        }

        loop {
            let mut context = self.contexts.acquire();
            context.reset(self.doc_type());
            let mut reader = JsonTokenReader::with_buffer(context.take_token_buffer());
            let result = reader
                .load(source)
                .and_then(|()| self.parse_document(&mut reader, &mut context, id, source))
                .and_then(|()| self.publish_staged(&mut context));
            context.restore_token_buffer(reader.close());
            let parsed = match result {
                Ok(true) => Ok(context.finish(source)),
                Ok(false) => {
                    self.contexts.release(context);
                    trace!(doc_type = %self.doc_type(), "Mapping changed while parsing, parsing again");
                    continue;
                }
                Err(e) => Err(e),
            };
            self.contexts.release(context);

            if let Ok(parsed) = &parsed {
                trace!(doc_type = %parsed.doc_type, uid = %parsed.uid, fields = parsed.doc.fields().len(), "Parsed document");
            }
            return parsed;
        }
    }

    fn parse_document(
        &self,
        reader: &mut JsonTokenReader,
        context: &mut ParseContext,
        id: Option<&str>,
        source: &[u8],
    ) -> Result<(), MapperError> {
        if reader.next_token() != Some(Token::StartObject) {
            return Err(MapperError::MalformedDocument(
                "malformed content, must start with an object".to_string(),
            ));
        }
        let Some(Token::FieldName(mut field_name)) = reader.next_token() else {
            return Err(MapperError::MalformedDocument(
                "malformed content, after first object, either the type field or the actual properties should exist"
                    .to_string(),
            ));
        };
        let mut token = reader.next_token();
        if field_name == self.doc_type() && token == Some(Token::StartObject) {
            // The body is wrapped in an object named after the type.
            token = reader.next_token();
            field_name.clear();
        }

        if self.source.enabled() {
            let field = self.source.create_field(FieldValue::Binary(source.to_vec()));
            context.doc_mut().add(field);
        }
        if let Some(id) = id {
            context.set_id(id);
            self.add_uid(context, id);
        }
        let type_field = self.type_mapper.create_field(FieldValue::Text(self.doc_type().to_string()));
        context.doc_mut().add(type_field);
        if self.index_mapper.enabled() {
            let index_field = self.index_mapper.create_field(FieldValue::Text(self.index().to_string()));
            context.doc_mut().add(index_field);
        }

        let root = self.root.load_full();
        context.path_mut().set_path_type(root.path_type());
        if root.enabled() {
            self.parse_object(reader, context, token, field_name)?;
        }

        if context.uid().is_none() {
            let id = match context.id() {
                Some(id) => id.to_string(),
                None => {
                    let generated = self.id_generator.generate();
                    context.set_id(generated.clone());
                    generated
                }
            };
            self.add_uid(context, &id);
        }
        if context.parsed_id() != ParsedIdState::Parsed {
            context.set_parsed_id(ParsedIdState::External);
            let id = context.id().unwrap_or_default().to_string();
            let id_field = self.id.create_field(FieldValue::Text(id));
            context.doc_mut().add(id_field);
        }
        if self.all.enabled() {
            let text = context.all_text().to_string();
            let all_field = self.all.create_field(FieldValue::Text(text));
            context.doc_mut().add(all_field);
        }
        Ok(())
    }

    fn add_uid(&self, context: &mut ParseContext, id: &str) {
        let uid = format!("{}#{}", self.doc_type(), id);
        let field = self.uid.create_field(FieldValue::Text(uid.clone()));
        context.doc_mut().add(field);
        context.set_uid(uid);
    }

    /// Parses the fields of the object at the context's current path,
    /// starting from `token` (already read) and stopping at its end.
    fn parse_object(
        &self,
        reader: &mut JsonTokenReader,
        context: &mut ParseContext,
        mut token: Option<Token>,
        mut field_name: String,
    ) -> Result<(), MapperError> {
        loop {
            match token {
                None => {
                    return Err(MapperError::MalformedDocument(
                        "unexpected end of content inside an object".to_string(),
                    ));
                }
                Some(Token::EndObject) => return Ok(()),
                Some(Token::FieldName(name)) => field_name = name,
                Some(Token::StartObject) => self.parse_inner_object(reader, context, &field_name)?,
                Some(Token::StartArray) => self.parse_array(reader, context, &field_name)?,
                Some(Token::Null) => {}
                Some(Token::EndArray) => {
                    return Err(MapperError::MalformedDocument(
                        "unexpected end of array inside an object".to_string(),
                    ));
                }
                Some(value) => self.parse_value(context, &field_name, &value)?,
            }
            token = reader.next_token();
        }
    }

    fn parse_inner_object(
        &self,
        reader: &mut JsonTokenReader,
        context: &mut ParseContext,
        name: &str,
    ) -> Result<(), MapperError> {
        if context.path().elements().is_empty() && self.root_field(name).is_some() {
            return Err(MapperError::MalformedDocument(format!(
                "field [{name}] is reserved and can't hold an object"
            )));
        }
        let Some(path_type) = self.enter_object(context, name)? else {
            reader.skip_children();
            return Ok(());
        };

        let previous = context.path().path_type();
        context.path_mut().add(name);
        context.path_mut().set_path_type(path_type);
        let first = reader.next_token();
        let result = self.parse_object(reader, context, first, String::new());
        context.path_mut().set_path_type(previous);
        context.path_mut().remove();
        result
    }

    /// Every element of an array is handled as a value of the field holding
    /// the array. Nested arrays are flattened.
    fn parse_array(&self, reader: &mut JsonTokenReader, context: &mut ParseContext, name: &str) -> Result<(), MapperError> {
        loop {
            match reader.next_token() {
                None => {
                    return Err(MapperError::MalformedDocument(format!(
                        "unexpected end of content inside array [{name}]"
                    )));
                }
                Some(Token::EndArray) => return Ok(()),
                Some(Token::StartObject) => self.parse_inner_object(reader, context, name)?,
                Some(Token::StartArray) => self.parse_array(reader, context, name)?,
                Some(Token::Null) => {}
                Some(Token::EndObject | Token::FieldName(_)) => {
                    return Err(MapperError::MalformedDocument(format!(
                        "unexpected object content inside array [{name}]"
                    )));
                }
                Some(value) => self.parse_value(context, name, &value)?,
            }
        }
    }

    fn parse_value(&self, context: &mut ParseContext, name: &str, token: &Token) -> Result<(), MapperError> {
        if context.path().elements().is_empty() {
            match self.root_field(name) {
                Some(RootField::Id) => return self.parse_body_id(context, token),
                Some(RootField::Boost) => return self.parse_body_boost(context, token),
                Some(RootField::Ignored) => return Ok(()),
                None => {}
            }
        }

        let existing = {
            let published = self.root.load();
            let parent = object_at(context.staged_root().unwrap_or(&**published), context)?;
            match parent.mapper(name) {
                Some(Mapper::Field(mapper)) => Some(mapper.clone()),
                Some(Mapper::Object(object)) => {
                    return Err(MapperError::MalformedDocument(format!(
                        "field [{}] is an object and can't hold the value [{}]",
                        object.full_path(),
                        token
                    )));
                }
                None if !parent.is_dynamic() => return Ok(()),
                None => None,
            }
        };
        let mapper = match existing {
            Some(mapper) => mapper,
            None => {
                let field_type = self.detect_type(token);
                self.add_dynamic_field(context, name, field_type)
            }
        };

        let value = mapper.parse_value(token)?;
        if mapper.include_in_all() {
            if let Some(text) = value.to_text() {
                context.include_in_all(&text);
            }
        }
        context.doc_mut().add(mapper.create_field(value));
        Ok(())
    }

    fn root_field(&self, name: &str) -> Option<RootField> {
        if name == self.id.name() {
            return Some(RootField::Id);
        }
        if self.boost.as_ref().is_some_and(|boost| boost.name() == name) {
            return Some(RootField::Boost);
        }
        let reserved = [
            SpecialKind::Uid,
            SpecialKind::Type,
            SpecialKind::Index,
            SpecialKind::Source,
            SpecialKind::All,
        ];
        reserved
            .iter()
            .any(|kind| kind.key() == name)
            .then_some(RootField::Ignored)
    }

    fn parse_body_id(&self, context: &mut ParseContext, token: &Token) -> Result<(), MapperError> {
        if context.parsed_id() != ParsedIdState::No {
            return Ok(());
        }
        let id = token
            .text()
            .ok_or_else(|| MapperError::MalformedDocument(format!("invalid id value [{token}]")))?;
        if let Some(provided) = context.id() {
            if provided != id {
                return Err(MapperError::MalformedDocument(format!(
                    "provided id [{provided}] does not match the content one [{id}]"
                )));
            }
        }
        let field = self.id.create_field(FieldValue::Text(id.clone()));
        context.doc_mut().add(field);
        context.set_id(id);
        context.set_parsed_id(ParsedIdState::Parsed);
        Ok(())
    }

    fn parse_body_boost(&self, context: &mut ParseContext, token: &Token) -> Result<(), MapperError> {
        let Some(boost) = &self.boost else {
            return Ok(());
        };
        let value = boost.field_mapper().parse_value(token)?;
        if let Some(factor) = value.as_f64() {
            context.doc_mut().set_boost(factor as f32);
        }
        let field = boost.create_field(value);
        context.doc_mut().add(field);
        Ok(())
    }

    fn detect_type(&self, token: &Token) -> FieldType {
        match token {
            Token::String(text) if self.date_detection && parse_date(text).is_some() => FieldType::Date,
            Token::Long(_) => FieldType::Long,
            Token::Double(_) => FieldType::Double,
            Token::Boolean(_) => FieldType::Boolean,
            _ => FieldType::String,
        }
    }

    /// Resolves the object `name` below the current path, creating it when
    /// the enclosing object is dynamic. `None` means its content is skipped.
    fn enter_object(&self, context: &mut ParseContext, name: &str) -> Result<Option<PathType>, MapperError> {
        let published = self.root.load();
        let include_in_all = {
            let parent = object_at(context.staged_root().unwrap_or(&**published), context)?;
            match parent.mapper(name) {
                Some(Mapper::Object(object)) => {
                    return Ok(object.enabled().then_some(object.path_type()));
                }
                Some(Mapper::Field(mapper)) => {
                    return Err(MapperError::MalformedDocument(format!(
                        "trying to parse an object but field [{}] is of type [{}]",
                        mapper.full_name(),
                        mapper.field_type().as_str()
                    )));
                }
                None if !parent.is_dynamic() => return Ok(None),
                None => parent.include_in_all_override(),
            }
        };

        let object = ObjectMapper::dynamic(name, context.path(), include_in_all);
        let path_type = object.path_type();
        context.stage(&**published, Mapper::Object(object));
        trace!(doc_type = %self.doc_type(), object = %context.path().full_path_as_text(name), "Staged dynamic object mapping");
        Ok(Some(path_type))
    }

    /// Creates a leaf under the current path. It stays private to this
    /// parse until [`DocumentMapper::publish_staged`].
    fn add_dynamic_field(&self, context: &mut ParseContext, name: &str, field_type: FieldType) -> Arc<FieldMapper> {
        let published = self.root.load();
        let include_in_all = context
            .staged_root()
            .unwrap_or(&**published)
            .object_at(context.path().elements())
            .and_then(ObjectMapper::include_in_all_override);
        let mut builder = FieldMapper::builder(name, field_type);
        if let Some(include_in_all) = include_in_all {
            builder = builder.include_in_all(include_in_all);
        }
        let mapper = Arc::new(builder.build(context.path()));
        context.stage(&**published, Mapper::Field(mapper.clone()));
        context.add_mapper(mapper.clone());
        mapper
    }

    /// Publishes what the parse staged and notifies listeners of every new
    /// leaf, in document order.
    ///
    /// Leaves another thread registered first in an identical form are
    /// dropped from the parse's additions. Returns `false`, publishing
    /// nothing, when the published tree changed in a way the staged one
    /// disagrees with; the document must then be parsed again.
    fn publish_staged(&self, context: &mut ParseContext) -> Result<bool, MapperError> {
        let Some(staged) = context.take_staged_root() else {
            return Ok(true);
        };
        let listeners = self.listeners.lock();
        let current = self.root.load_full();
        let mut root = ObjectMapper::clone(&current);
        let mut inserted = Vec::new();
        if !graft(&mut root, &staged, &mut inserted) {
            return Ok(false);
        }
        let mut leaves = Vec::new();
        for mapper in &inserted {
            mapper.traverse(&mut |leaf: &Arc<FieldMapper>| leaves.push(leaf.clone()));
        }
        context.retain_added(|mapper| leaves.iter().any(|leaf| Arc::ptr_eq(leaf, mapper)));
        if inserted.is_empty() {
            return Ok(true);
        }

        let added = context.mappers_added().to_vec();
        self.publish(root, &added)?;
        for mapper in &added {
            debug!(
                doc_type = %self.doc_type(),
                field = %mapper.full_name(),
                field_type = mapper.field_type().as_str(),
                "Added dynamic field mapping"
            );
            for listener in listeners.iter() {
                listener.field_mapper(mapper);
            }
        }
        Ok(true)
    }
}

/// Copies the children `staged` has and `target` lacks into `target`,
/// recording each copied subtree in `inserted`. Returns `false` when the two
/// trees disagree on a node they both have.
fn graft(target: &mut ObjectMapper, staged: &ObjectMapper, inserted: &mut Vec<Mapper>) -> bool {
    for child in staged.mappers() {
        let name = child.name();
        if !target.mappers.contains_key(name) {
            inserted.push(child.clone());
            target.put_mapper(child.clone());
            continue;
        }
        let agrees = match (target.mappers.get_mut(name), child) {
            (Some(Mapper::Field(current)), Mapper::Field(staged)) => Arc::ptr_eq(current, staged) || **current == **staged,
            (Some(Mapper::Object(current)), Mapper::Object(staged)) => {
                current.enabled == staged.enabled
                    && current.dynamic == staged.dynamic
                    && current.path_type == staged.path_type
                    && current.include_in_all == staged.include_in_all
                    && graft(current, staged, inserted)
            }
            _ => false,
        };
        if !agrees {
            return false;
        }
    }
    true
}

fn object_at<'a>(root: &'a ObjectMapper, context: &ParseContext) -> Result<&'a ObjectMapper, MapperError> {
    root.object_at(context.path().elements()).ok_or_else(|| {
        MapperError::MalformedDocument(format!(
            "no object mapping for path [{}]",
            context.path().elements().join(".")
        ))
    })
}
