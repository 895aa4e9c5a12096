//! In-memory object table with flat-file persistence
//!
//! The store maps user-supplied string keys to objects carrying optional
//! structured metadata and optional opaque bytes. Objects are created lazily
//! on first upsert and get a server-assigned id that is never reused.
//!
//! # Persistence
//!
//! When a persist directory is configured, every accepted mutation rewrites
//! the object on disk as a pair of files:
//!
//! - `<id>.meta`: UTF-8 JSON `{"metadata": ..., "last_data": ..., "key": ..., "id": ...}`
//! - `<id>.data`: the raw bytes, present only when the object has data
//!
//! The `.data` file is only rewritten when the bytes changed since the last
//! write (the record's dirty flag). Deleting an object removes both files;
//! removal failures are ignored. On startup the directory is scanned and
//! every loadable object is restored; files that cannot be parsed are logged
//! and skipped, but their ids still advance the id counter so a later
//! creation can never collide with a half-dead record on disk.
//!
//! The store itself does no locking. The coordinator is its only mutator and
//! the HTTP read paths take shared read access through the surrounding
//! `RwLock`, which is the many-reader/single-writer model of the service.

use bytes::Bytes;
use cvl_core::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as fractional unix seconds.
pub(crate) fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// On-disk shape of `<id>.meta`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedMeta {
    metadata: Option<Value>,
    last_data: f64,
    key: String,
    id: u64,
}

/// A single keyed object.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    key: String,
    id: u64,
    metadata: Option<Value>,
    data: Option<Bytes>,
    last_data: f64,
    data_dirty: bool,
}

impl ObjectRecord {
    fn new(key: String, id: u64) -> Self {
        Self {
            key,
            id,
            metadata: None,
            data: None,
            last_data: 0.0,
            data_dirty: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Unix seconds of the most recent data assignment; 0 if never assigned.
    pub fn last_data(&self) -> f64 {
        self.last_data
    }

    /// Maintain the derived metadata fields after a mutation.
    ///
    /// `updated`, `has_data` and `last_data` are overwritten on every call;
    /// `path` is only defaulted when absent. Objects without metadata (data
    /// published ahead of its description) are left untouched.
    fn refresh_metadata(&mut self, now: f64) {
        let has_data = self.data.is_some();
        let last_data = self.last_data;
        if let Some(Value::Object(meta)) = self.metadata.as_mut() {
            meta.insert("updated".to_string(), json!(now));
            meta.entry("path").or_insert(json!(""));
            meta.insert("has_data".to_string(), json!(has_data));
            meta.insert("last_data".to_string(), json!(last_data));
        }
    }

    /// Rewrite this object's files under `dir`.
    fn persist(&mut self, dir: &Path) -> std::io::Result<()> {
        let record = PersistedMeta {
            metadata: self.metadata.clone(),
            last_data: self.last_data,
            key: self.key.clone(),
            id: self.id,
        };
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(dir.join(format!("{}.meta", self.id)), encoded)?;
        if self.data_dirty {
            if let Some(data) = &self.data {
                fs::write(dir.join(format!("{}.data", self.id)), data)?;
            }
            self.data_dirty = false;
        }
        Ok(())
    }

    /// Remove this object's files from `dir`; missing files are fine.
    fn purge(&self, dir: &Path) {
        let _ = fs::remove_file(dir.join(format!("{}.meta", self.id)));
        let _ = fs::remove_file(dir.join(format!("{}.data", self.id)));
    }
}

/// Insertion-ordered table of objects plus the object id counter.
#[derive(Debug)]
pub struct ObjectStore {
    objects: IndexMap<String, ObjectRecord>,
    next_object_id: u64,
    persist_dir: Option<PathBuf>,
}

impl ObjectStore {
    /// Empty store. With `persist_dir` set, mutations are written through.
    pub fn new(persist_dir: Option<PathBuf>) -> Self {
        Self {
            objects: IndexMap::new(),
            next_object_id: 1,
            persist_dir,
        }
    }

    /// Restore every loadable object from `dir`.
    pub fn load(dir: PathBuf) -> Self {
        let mut store = Self::new(Some(dir.clone()));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "cannot scan persist directory");
                return store;
            }
        };
        let mut max_id = 0u64;
        let mut seen = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(id) = stem.parse::<u64>() else {
                tracing::warn!(file = %path.display(), "unrecognized file in persist directory");
                continue;
            };
            max_id = max_id.max(id);
            if !seen.insert(id) {
                continue;
            }
            match Self::load_record(&dir, id) {
                Ok(record) => {
                    store.objects.insert(record.key.clone(), record);
                }
                Err(err) => {
                    tracing::warn!(id, error = %err, "failed to load persisted object");
                }
            }
        }
        store.next_object_id = max_id + 1;
        tracing::info!(count = store.objects.len(), dir = %dir.display(), "loaded persisted objects");
        store
    }

    fn load_record(dir: &Path, id: u64) -> Result<ObjectRecord> {
        let raw = fs::read(dir.join(format!("{id}.meta")))?;
        let meta: PersistedMeta = serde_json::from_slice(&raw)?;
        let data = fs::read(dir.join(format!("{id}.data"))).ok().map(Bytes::from);
        Ok(ObjectRecord {
            key: meta.key,
            id,
            metadata: meta.metadata,
            data,
            last_data: meta.last_data,
            data_dirty: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<&ObjectRecord> {
        self.objects.get(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keys of every object whose metadata is set, in insertion order.
    ///
    /// Objects that only had data published so far are not listed; they
    /// become visible once their first metadata arrives.
    pub fn keys_with_metadata(&self) -> Vec<String> {
        self.objects
            .values()
            .filter(|o| o.metadata.is_some())
            .map(|o| o.key.clone())
            .collect()
    }

    /// Apply an upsert to `key`, creating the object if needed.
    ///
    /// Returns true when a notification should go out, i.e. the object has
    /// metadata after the mutation. Persistence failures are logged and do
    /// not undo the in-memory update.
    pub(crate) fn apply_upsert(
        &mut self,
        key: &str,
        metadata: Option<Value>,
        data: Option<Bytes>,
    ) -> bool {
        let now = unix_time();
        let Self {
            objects,
            next_object_id,
            persist_dir,
        } = self;
        let record = objects.entry(key.to_string()).or_insert_with(|| {
            let id = *next_object_id;
            *next_object_id += 1;
            ObjectRecord::new(key.to_string(), id)
        });
        if let Some(meta) = metadata {
            record.metadata = Some(meta);
        }
        if let Some(bytes) = data {
            record.data = Some(bytes);
            record.last_data = now;
            record.data_dirty = true;
        }
        record.refresh_metadata(now);
        if let Some(dir) = persist_dir.as_deref() {
            if let Err(err) = record.persist(dir) {
                tracing::warn!(key = %record.key, id = record.id, error = %err, "failed to persist object");
            }
        }
        record.metadata.is_some()
    }

    /// Remove `key` and purge its files. Unknown keys are a no-op.
    pub(crate) fn remove(&mut self, key: &str) {
        if let Some(record) = self.objects.shift_remove(key) {
            if let Some(dir) = self.persist_dir.as_deref() {
                record.purge(dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_assigns_sequential_ids() {
        let mut store = ObjectStore::new(None);
        store.apply_upsert("a", Some(json!({})), None);
        store.apply_upsert("b", Some(json!({})), None);
        assert_eq!(store.get("a").unwrap().id(), 1);
        assert_eq!(store.get("b").unwrap().id(), 2);
    }

    #[test]
    fn test_id_stable_across_updates() {
        let mut store = ObjectStore::new(None);
        store.apply_upsert("a", Some(json!({"v": 1})), None);
        let id = store.get("a").unwrap().id();
        store.apply_upsert("a", Some(json!({"v": 2})), None);
        store.apply_upsert("a", None, Some(Bytes::from_static(b"xyz")));
        assert_eq!(store.get("a").unwrap().id(), id);
    }

    #[test]
    fn test_derived_metadata_fields() {
        let mut store = ObjectStore::new(None);
        store.apply_upsert("a", Some(json!({"name": "lake"})), None);
        let meta = store.get("a").unwrap().metadata().unwrap();
        assert_eq!(meta["has_data"], json!(false));
        assert_eq!(meta["path"], json!(""));
        assert_eq!(meta["last_data"], json!(0.0));
        let first_updated = meta["updated"].as_f64().unwrap();
        assert!(first_updated > 0.0);

        store.apply_upsert("a", None, Some(Bytes::from_static(b"\x01\x02")));
        let record = store.get("a").unwrap();
        let meta = record.metadata().unwrap();
        assert_eq!(meta["has_data"], json!(true));
        assert_eq!(meta["last_data"].as_f64().unwrap(), record.last_data());
        assert!(meta["updated"].as_f64().unwrap() >= first_updated);
        assert_eq!(meta["name"], json!("lake"));
    }

    #[test]
    fn test_explicit_path_is_preserved() {
        let mut store = ObjectStore::new(None);
        store.apply_upsert("a", Some(json!({"path": "layers/bed"})), None);
        assert_eq!(store.get("a").unwrap().metadata().unwrap()["path"], json!("layers/bed"));
    }

    #[test]
    fn test_data_before_metadata_is_silent() {
        let mut store = ObjectStore::new(None);
        assert!(!store.apply_upsert("a", None, Some(Bytes::from_static(b"raw"))));
        assert!(store.get("a").unwrap().metadata().is_none());
        assert!(store.keys_with_metadata().is_empty());
        // First metadata makes the object visible.
        assert!(store.apply_upsert("a", Some(json!({})), None));
        assert_eq!(store.keys_with_metadata(), vec!["a".to_string()]);
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let mut store = ObjectStore::new(None);
        store.apply_upsert("a", Some(json!({})), None);
        store.remove("ghost");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ObjectStore::new(Some(dir.path().to_path_buf()));
        store.apply_upsert("bar", Some(json!({"kind": "raster"})), None);
        store.apply_upsert("bar", None, Some(Bytes::from_static(b"\xDE\xAD\xBE\xEF")));
        store.apply_upsert("meta-only", Some(json!({"kind": "geojson"})), None);
        let last_data = store.get("bar").unwrap().last_data();

        let reloaded = ObjectStore::load(dir.path().to_path_buf());
        assert_eq!(reloaded.len(), 2);
        let bar = reloaded.get("bar").unwrap();
        assert_eq!(bar.id(), 1);
        assert_eq!(bar.data().unwrap().as_ref(), b"\xDE\xAD\xBE\xEF");
        assert_eq!(bar.last_data(), last_data);
        assert_eq!(bar.metadata().unwrap()["kind"], json!("raster"));
        assert!(reloaded.get("meta-only").unwrap().data().is_none());
        // A new object must not reuse an id.
        let mut reloaded = reloaded;
        reloaded.apply_upsert("fresh", Some(json!({})), None);
        assert_eq!(reloaded.get("fresh").unwrap().id(), 3);
    }

    #[test]
    fn test_reload_skips_corrupt_meta_but_advances_ids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7.meta"), b"not json").unwrap();
        let mut store = ObjectStore::load(dir.path().to_path_buf());
        assert!(store.is_empty());
        store.apply_upsert("a", Some(json!({})), None);
        assert_eq!(store.get("a").unwrap().id(), 8);
    }

    #[test]
    fn test_reload_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let store = ObjectStore::load(dir.path().to_path_buf());
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_purges_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ObjectStore::new(Some(dir.path().to_path_buf()));
        store.apply_upsert("bar", Some(json!({})), Some(Bytes::from_static(b"bits")));
        assert!(dir.path().join("1.meta").exists());
        assert!(dir.path().join("1.data").exists());
        store.remove("bar");
        assert!(!dir.path().join("1.meta").exists());
        assert!(!dir.path().join("1.data").exists());
    }

    #[test]
    fn test_data_file_only_rewritten_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ObjectStore::new(Some(dir.path().to_path_buf()));
        store.apply_upsert("bar", None, Some(Bytes::from_static(b"v1")));
        std::fs::write(dir.path().join("1.data"), b"tampered").unwrap();
        // Metadata-only update leaves the data file alone.
        store.apply_upsert("bar", Some(json!({})), None);
        assert_eq!(std::fs::read(dir.path().join("1.data")).unwrap(), b"tampered");
        // A data update rewrites it.
        store.apply_upsert("bar", None, Some(Bytes::from_static(b"v2")));
        assert_eq!(std::fs::read(dir.path().join("1.data")).unwrap(), b"v2");
    }
}
