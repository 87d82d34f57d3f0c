//! Keyed document storage.
//!
//! Documents are JSON objects grouped into collections. A document is
//! addressed either by the id assigned when it was inserted, or by a natural
//! key made of some of its top-level string fields. Documents handed out by a
//! store carry their id in the `_id` field; the field is stripped again on
//! write.

mod file;
mod memory;
pub mod records;
mod repository;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use repository::Records;
pub(crate) use repository::from_document;

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Validated pipelines per repository branch
    RepoConfigs,
    /// One document per pipeline run
    JobsHistory,
    /// Last repository set by each user
    Sessions,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::RepoConfigs => "repo_configs",
            Self::JobsHistory => "jobs_history",
            Self::Sessions => "sessions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Natural key: field name to the exact string value it must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentKey(BTreeMap<String, String>);

impl DocumentKey {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.0.iter().all(|(field, value)| {
            document.get(field).and_then(Value::as_str) == Some(value.as_str())
        })
    }

    fn write_into(&self, document: &mut Document) {
        for (field, value) in &self.0 {
            document.insert(field.clone(), Value::String(value.clone()));
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&pairs.join(", "))
    }
}

/// Blocking document store.
///
/// Each call is one round trip. Absent documents are `Ok(None)`; `Err` always
/// means the store itself failed.
pub trait DocumentStore {
    /// Merges `document` into the document matching `key`, or inserts it when
    /// nothing matches.
    ///
    /// Top-level fields of the match are replaced by the fields of `document`;
    /// fields it does not mention are kept. The key fields are always written.
    fn upsert_by_key(
        &self,
        collection: Collection,
        key: &DocumentKey,
        document: Document,
    ) -> Result<()>;

    /// First document matching `key`, in insertion order.
    fn get_by_key(&self, collection: Collection, key: &DocumentKey) -> Result<Option<Document>>;

    fn get_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>>;

    /// Inserts `document` and returns its new id.
    fn insert(&self, collection: Collection, document: Document) -> Result<String>;

    /// Replaces the whole document stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when no document has this id.
    fn replace_by_id(&self, collection: Collection, id: &str, document: Document) -> Result<()>;
}

/// One collection's documents keyed by id, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Documents(IndexMap<String, Document>);

impl Documents {
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn upsert(&mut self, key: &DocumentKey, mut document: Document) -> String {
        document.remove(ID_FIELD);
        key.write_into(&mut document);

        if let Some((id, existing)) = self.0.iter_mut().find(|(_, d)| key.matches(d)) {
            existing.extend(document);
            return id.clone();
        }
        self.insert(document)
    }

    pub(crate) fn find(&self, key: &DocumentKey) -> Option<Document> {
        self.0
            .iter()
            .find(|(_, d)| key.matches(d))
            .map(|(id, d)| with_id(id, d))
    }

    pub(crate) fn get(&self, id: &str) -> Option<Document> {
        self.0.get(id).map(|d| with_id(id, d))
    }

    pub(crate) fn insert(&mut self, mut document: Document) -> String {
        document.remove(ID_FIELD);
        let id = Uuid::new_v4().to_string();
        self.0.insert(id.clone(), document);
        id
    }

    pub(crate) fn replace(&mut self, id: &str, mut document: Document) -> bool {
        document.remove(ID_FIELD);
        match self.0.get_mut(id) {
            Some(existing) => {
                *existing = document;
                true
            }
            None => false,
        }
    }
}

fn with_id(id: &str, document: &Document) -> Document {
    let mut document = document.clone();
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    document
}
