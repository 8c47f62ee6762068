use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::bucket::Bucket;
use crate::error::CueClubError;

/// The whole persisted state: bucket name -> arbitrary JSON value.
pub type Document = Map<String, Value>;

/// Backing medium for the persisted document. Implementations only move
/// serialized text; parsing and bucket handling live in [`Storage`].
pub trait StorageBackend: Send + Sync {
    /// Returns `None` when nothing has been written yet.
    fn read(&self) -> crate::Result<Option<String>>;
    fn write(&self, data: &str) -> crate::Result<()>;

    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Single JSON file on disk, replaced atomically on every write.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageBackend for FileBackend {
    fn read(&self) -> crate::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }

    fn write(&self, data: &str) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&self.path, data.as_bytes())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<Option<String>>,
}

impl StorageBackend for MemoryBackend {
    fn read(&self) -> crate::Result<Option<String>> {
        let guard = self
            .data
            .read()
            .map_err(|e| CueClubError::Storage(e.to_string()))?;
        Ok(guard.clone())
    }

    fn write(&self, data: &str) -> crate::Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|e| CueClubError::Storage(e.to_string()))?;
        *guard = Some(data.to_string());
        Ok(())
    }
}

/// Local key-value store over one JSON document.
///
/// Every read loads the full document and every write replaces it. Failures
/// are logged and absorbed: reads fall back to an empty document, writes
/// report `false`.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(Arc::new(FileBackend::new(path)))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::default()))
    }

    /// Path of the backing file, when the medium is a file.
    pub fn data_path(&self) -> Option<PathBuf> {
        self.backend.location().map(Path::to_path_buf)
    }

    pub fn get_all(&self) -> Document {
        match self.load_document() {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to read persisted document, using empty state: {}", e);
                Document::new()
            }
        }
    }

    pub fn set_all(&self, document: &Document) -> bool {
        match self.save_document(document) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write persisted document: {}", e);
                false
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_all().remove(key)
    }

    pub fn set(&self, key: &str, value: Value) -> bool {
        self.update(|document| {
            document.insert(key.to_string(), value);
        })
    }

    pub fn remove(&self, key: &str) -> bool {
        self.update(|document| {
            document.remove(key);
        })
    }

    pub fn keys(&self) -> Vec<String> {
        self.get_all().keys().cloned().collect()
    }

    pub fn clear(&self) -> bool {
        self.set_all(&Document::new())
    }

    pub fn get_bucket(&self, bucket: Bucket) -> Option<Value> {
        self.get(bucket.key())
    }

    pub fn set_bucket(&self, bucket: Bucket, value: Value) -> bool {
        self.set(bucket.key(), value)
    }

    /// Read-modify-write of the full document.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Document),
    {
        let mut document = self.get_all();
        f(&mut document);
        self.set_all(&document)
    }

    fn load_document(&self) -> crate::Result<Document> {
        let Some(data) = self.backend.read()? else {
            return Ok(Document::new());
        };
        if data.trim().is_empty() {
            return Ok(Document::new());
        }
        match serde_json::from_str::<Value>(&data)? {
            Value::Object(document) => Ok(document),
            other => Err(CueClubError::Storage(format!(
                "expected a JSON object at the top level, found {}",
                json_kind(&other)
            ))),
        }
    }

    fn save_document(&self, document: &Document) -> crate::Result<()> {
        let data = serde_json::to_string_pretty(document)?;
        self.backend.write(&data)?;
        debug!("Persisted document with {} buckets", document.len());
        Ok(())
    }
}

// Writes to a temp file next to `path` and renames it into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CueClubError::Storage("Invalid path".to_string()))?;
    use rand::{thread_rng, Rng};
    let suffix: u64 = thread_rng().gen();
    let tmp = parent.join(format!(".tmp_cueclub.{}.tmp", suffix));

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn file_storage() -> (Storage, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let storage = Storage::with_path(tmp_dir.path().join("cueclub-data.json"));
        (storage, tmp_dir)
    }

    #[test]
    fn test_set_then_get_every_bucket() {
        let (storage, _guard) = file_storage();
        let values = [
            json!({ "clubName": "Ace Snooker", "currency": "EUR" }),
            json!([{ "id": 1, "name": "Table 1", "hourlyRate": 12.5 }]),
            json!([{ "username": "admin", "role": "owner" }]),
            json!([{ "id": "t-1", "total": 24.0, "items": [] }]),
            json!([{ "date": "2026-10-13", "cash": 310.0 }]),
            json!([]),
            json!("4821"),
            json!([{ "table": 2, "from": "18:00" }]),
            json!({ "pointsPerEuro": 1, "enabled": true }),
        ];

        for (bucket, value) in Bucket::ALL.iter().zip(values.iter()) {
            assert!(storage.set_bucket(*bucket, value.clone()));
        }
        for (bucket, value) in Bucket::ALL.iter().zip(values.iter()) {
            assert_eq!(storage.get_bucket(*bucket).as_ref(), Some(value));
        }
    }

    #[test]
    fn test_clear_removes_all_keys() {
        let (storage, _guard) = file_storage();
        storage.set("settings", json!({ "clubName": "Ace" }));
        storage.set("tables", json!([]));
        assert_eq!(storage.keys().len(), 2);

        assert!(storage.clear());
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let (storage, _guard) = file_storage();
        assert!(storage.get_all().is_empty());
        assert_eq!(storage.get("settings"), None);
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let (storage, _guard) = file_storage();
        let path = storage.data_path().unwrap();
        fs::write(&path, "{ this is not json").unwrap();
        assert!(storage.get_all().is_empty());

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(storage.get_all().is_empty());
    }

    #[test]
    fn test_remove_only_drops_one_key() {
        let (storage, _guard) = file_storage();
        storage.set("settings", json!({}));
        storage.set("expenses", json!([1]));
        assert!(storage.remove("settings"));
        assert_eq!(storage.keys(), vec!["expenses".to_string()]);
    }

    #[test]
    fn test_persistence_across_instances() {
        let (storage, guard) = file_storage();
        storage.set("reservations", json!([{ "table": 3 }]));

        let reopened = Storage::with_path(guard.path().join("cueclub-data.json"));
        assert_eq!(reopened.get("reservations"), Some(json!([{ "table": 3 }])));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let (storage, guard) = file_storage();
        storage.set("settings", json!({ "clubName": "Ace" }));
        storage.set("settings", json!({ "clubName": "Ace 2" }));

        let names: Vec<String> = fs::read_dir(guard.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["cueclub-data.json".to_string()]);
    }

    #[test]
    fn test_write_failure_reports_false() {
        let tmp_dir = TempDir::new().unwrap();
        // A directory where the document file should be makes the rename fail.
        let path = tmp_dir.path().join("cueclub-data.json");
        fs::create_dir_all(path.join("occupied")).unwrap();
        let storage = Storage::with_path(&path);
        assert!(!storage.set("settings", json!({})));
    }

    #[test]
    fn test_in_memory_backend() {
        let storage = Storage::in_memory();
        assert!(storage.data_path().is_none());
        storage.set("emergencyPin", json!("0000"));
        let shared = storage.clone();
        assert_eq!(shared.get("emergencyPin"), Some(json!("0000")));
    }
}
