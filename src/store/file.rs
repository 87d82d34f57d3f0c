use std::fs;
use std::path::PathBuf;

use log::{debug, info};

use crate::error::{CidError, Result};

use super::{Collection, Document, DocumentKey, DocumentStore, Documents};

/// Document store backed by one JSON file per collection.
///
/// Files live directly in the store directory and are named after their
/// collection (`repo_configs.json`, `jobs_history.json`, `sessions.json`).
/// Every call reads the whole file; writes go to a temporary file that is then
/// renamed over the original, so a crash never leaves half a file behind.
/// There is no locking between processes: the last writer wins.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            CidError::Persistence(format!("cannot create store directory {}: {e}", dir.display()))
        })?;
        info!("Using document store at: {}", dir.display());
        Ok(Self { dir })
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.json", collection.name()))
    }

    fn load(&self, collection: Collection) -> Result<Documents> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(Documents::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| CidError::Persistence(format!("cannot read {}: {e}", path.display())))?;
        let documents: Documents = serde_json::from_str(&content).map_err(|e| {
            CidError::Persistence(format!("corrupt collection file {}: {e}", path.display()))
        })?;

        debug!("Loaded {} documents from {}", documents.len(), path.display());
        Ok(documents)
    }

    fn save(&self, collection: Collection, documents: &Documents) -> Result<()> {
        let path = self.path(collection);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(documents)?;
        fs::write(&tmp, content)
            .map_err(|e| CidError::Persistence(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| CidError::Persistence(format!("cannot replace {}: {e}", path.display())))?;

        debug!("Saved {} documents to {}", documents.len(), path.display());
        Ok(())
    }

    fn modify<T>(
        &self,
        collection: Collection,
        change: impl FnOnce(&mut Documents) -> T,
    ) -> Result<T> {
        let mut documents = self.load(collection)?;
        let result = change(&mut documents);
        self.save(collection, &documents)?;
        Ok(result)
    }
}

impl DocumentStore for JsonFileStore {
    fn upsert_by_key(
        &self,
        collection: Collection,
        key: &DocumentKey,
        document: Document,
    ) -> Result<()> {
        let id = self.modify(collection, |docs| docs.upsert(key, document))?;
        debug!("Upserted {collection} document {id} ({key})");
        Ok(())
    }

    fn get_by_key(&self, collection: Collection, key: &DocumentKey) -> Result<Option<Document>> {
        Ok(self.load(collection)?.find(key))
    }

    fn get_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        Ok(self.load(collection)?.get(id))
    }

    fn insert(&self, collection: Collection, document: Document) -> Result<String> {
        self.modify(collection, |docs| docs.insert(document))
    }

    fn replace_by_id(&self, collection: Collection, id: &str, document: Document) -> Result<()> {
        let mut documents = self.load(collection)?;
        if !documents.replace(id, document) {
            return Err(CidError::Persistence(format!("no document '{id}' in {collection}")));
        }
        self.save(collection, &documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("store");

        let store = JsonFileStore::open(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(store.get_by_id(Collection::Sessions, "missing").unwrap(), None);
    }

    #[test]
    fn test_documents_survive_reopening() {
        let temp = TempDir::new().unwrap();
        let key = DocumentKey::new().field("user_id", "alice");

        let id = {
            let store = JsonFileStore::open(temp.path()).unwrap();
            store
                .upsert_by_key(Collection::Sessions, &key, doc(json!({"branch": "main"})))
                .unwrap();
            store
                .insert(Collection::JobsHistory, doc(json!({"run_number": 1})))
                .unwrap()
        };

        let store = JsonFileStore::open(temp.path()).unwrap();
        let session = store.get_by_key(Collection::Sessions, &key).unwrap().unwrap();
        assert_eq!(session["branch"], "main");
        let run = store.get_by_id(Collection::JobsHistory, &id).unwrap().unwrap();
        assert_eq!(run["run_number"], 1);
        assert!(temp.path().join("sessions.json").is_file());
        assert!(temp.path().join("jobs_history.json").is_file());
        assert!(!temp.path().join("sessions.json.tmp").exists());
    }

    #[test]
    fn test_missing_collection_reads_as_empty() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();

        assert!(store.get_by_id(Collection::RepoConfigs, "x").unwrap().is_none());
        assert!(store
            .get_by_key(Collection::RepoConfigs, &DocumentKey::new().field("repo_name", "x"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupt_file_is_a_persistence_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("jobs_history.json"), "{not json").unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();

        let err = store.get_by_id(Collection::JobsHistory, "x").unwrap_err();

        assert!(matches!(err, CidError::Persistence(_)));
        assert!(err.to_string().contains("corrupt collection file"));
    }

    #[test]
    fn test_replace_by_id() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();
        let id = store
            .insert(Collection::JobsHistory, doc(json!({"status": null})))
            .unwrap();

        store
            .replace_by_id(Collection::JobsHistory, &id, doc(json!({"status": "running"})))
            .unwrap();
        let err = store
            .replace_by_id(Collection::JobsHistory, "unknown", Document::new())
            .unwrap_err();

        let run = store.get_by_id(Collection::JobsHistory, &id).unwrap().unwrap();
        assert_eq!(run["status"], "running");
        assert!(err.to_string().contains("no document 'unknown'"));
    }
}
