use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{CidError, Result};

use super::{Collection, Document, DocumentKey, DocumentStore, Documents};

/// Store that keeps every collection in memory for the life of the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RefCell<HashMap<Collection, Documents>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    #[cfg(test)]
    pub fn count(&self, collection: Collection) -> usize {
        self.collections
            .borrow()
            .get(&collection)
            .map_or(0, Documents::len)
    }
}

impl DocumentStore for MemoryStore {
    fn upsert_by_key(
        &self,
        collection: Collection,
        key: &DocumentKey,
        document: Document,
    ) -> Result<()> {
        self.collections
            .borrow_mut()
            .entry(collection)
            .or_default()
            .upsert(key, document);
        Ok(())
    }

    fn get_by_key(&self, collection: Collection, key: &DocumentKey) -> Result<Option<Document>> {
        Ok(self
            .collections
            .borrow()
            .get(&collection)
            .and_then(|docs| docs.find(key)))
    }

    fn get_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .borrow()
            .get(&collection)
            .and_then(|docs| docs.get(id)))
    }

    fn insert(&self, collection: Collection, document: Document) -> Result<String> {
        Ok(self
            .collections
            .borrow_mut()
            .entry(collection)
            .or_default()
            .insert(document))
    }

    fn replace_by_id(&self, collection: Collection, id: &str, document: Document) -> Result<()> {
        let replaced = self
            .collections
            .borrow_mut()
            .get_mut(&collection)
            .is_some_and(|docs| docs.replace(id, document));

        if replaced {
            Ok(())
        } else {
            Err(CidError::Persistence(format!("no document '{id}' in {collection}")))
        }
    }
}
