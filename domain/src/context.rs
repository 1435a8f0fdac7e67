use std::mem;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;

use crate::document::{Document, ParsedDocument};
use crate::field::FieldMapper;
use crate::object::{Mapper, ObjectMapper};
use crate::path::ContentPath;
use crate::token::Token;

/// Where the document id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsedIdState {
    /// Not seen yet.
    #[default]
    No,
    /// Read from an `_id` field in the body.
    Parsed,
    /// Supplied by the caller or generated.
    External,
}

/// Reusable scratch state for parsing one document.
///
/// A context belongs to one thread at a time; it is reset, never rebuilt,
/// between documents so its buffers keep their capacity.
#[derive(Debug, Default)]
pub struct ParseContext {
    doc_type: String,
    id: Option<String>,
    uid: Option<String>,
    parsed_id: ParsedIdState,
    doc: Document,
    path: ContentPath,
    mappers_added: Vec<Arc<FieldMapper>>,
    /// Published tree plus this parse's dynamic additions. Only published
    /// once the whole document parsed.
    staged_root: Option<ObjectMapper>,
    all_text: String,
    token_buffer: Vec<Token>,
}

impl ParseContext {
    pub fn reset(&mut self, doc_type: &str) {
        self.doc_type.clear();
        self.doc_type.push_str(doc_type);
        self.id = None;
        self.uid = None;
        self.parsed_id = ParsedIdState::No;
        self.doc.clear();
        self.path.reset();
        self.mappers_added.clear();
        self.staged_root = None;
        self.all_text.clear();
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn set_uid(&mut self, uid: String) {
        self.uid = Some(uid);
    }

    pub fn parsed_id(&self) -> ParsedIdState {
        self.parsed_id
    }

    pub fn set_parsed_id(&mut self, state: ParsedIdState) {
        self.parsed_id = state;
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn path(&self) -> &ContentPath {
        &self.path
    }

    pub fn path_mut(&mut self) -> &mut ContentPath {
        &mut self.path
    }

    pub fn mappers_added(&self) -> &[Arc<FieldMapper>] {
        &self.mappers_added
    }

    pub(crate) fn add_mapper(&mut self, mapper: Arc<FieldMapper>) {
        self.mappers_added.push(mapper);
    }

    pub(crate) fn retain_added(&mut self, keep: impl FnMut(&Arc<FieldMapper>) -> bool) {
        self.mappers_added.retain(keep);
    }

    /// The tree this parse resolves names against, if it added anything.
    pub(crate) fn staged_root(&self) -> Option<&ObjectMapper> {
        self.staged_root.as_ref()
    }

    /// Adds `mapper` under the current path of a private copy of
    /// `published`, taken on first use.
    pub(crate) fn stage(&mut self, published: &ObjectMapper, mapper: Mapper) {
        let root = self.staged_root.get_or_insert_with(|| published.clone());
        if let Some(parent) = root.object_at_mut(self.path.elements()) {
            parent.put_mapper(mapper);
        }
    }

    pub(crate) fn take_staged_root(&mut self) -> Option<ObjectMapper> {
        self.staged_root.take()
    }

    /// Appends text destined for the catch-all field.
    pub fn include_in_all(&mut self, text: &str) {
        if !self.all_text.is_empty() {
            self.all_text.push(' ');
        }
        self.all_text.push_str(text);
    }

    pub fn all_text(&self) -> &str {
        &self.all_text
    }

    pub(crate) fn take_token_buffer(&mut self) -> Vec<Token> {
        mem::take(&mut self.token_buffer)
    }

    pub(crate) fn restore_token_buffer(&mut self, buffer: Vec<Token>) {
        self.token_buffer = buffer;
    }

    /// Moves the result of the current parse out of the context.
    pub(crate) fn finish(&mut self, source: &[u8]) -> ParsedDocument {
        ParsedDocument {
            uid: self.uid.take().unwrap_or_default(),
            id: self.id.take().unwrap_or_default(),
            doc_type: self.doc_type.clone(),
            doc: mem::take(&mut self.doc),
            source: source.to_vec(),
            mappers_added: mem::take(&mut self.mappers_added),
        }
    }
}

/// One parse context per calling thread.
///
/// A context is taken out of the pool for the duration of a parse and put
/// back afterwards, so no two threads ever hold the same context.
#[derive(Debug, Default)]
pub(crate) struct ParseContextPool {
    contexts: DashMap<ThreadId, ParseContext>,
}

impl ParseContextPool {
    /// The calling thread's context, created on first use.
    pub(crate) fn acquire(&self) -> ParseContext {
        self.contexts
            .remove(&thread::current().id())
            .map(|(_, context)| context)
            .unwrap_or_default()
    }

    pub(crate) fn release(&self, context: ParseContext) {
        self.contexts.insert(thread::current().id(), context);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.contexts.len()
    }
}
