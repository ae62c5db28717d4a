use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use era_core::error::{Error, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Precondition for [`CatalogStore::conditional_put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Succeed only if no record currently exists for this id (create semantics).
    Absent,
    /// No precondition (overwrite, used for ordinary updates — single-writer
    /// safety for updates comes from the caller's own VM/session mutex).
    Any,
}

/// Embedded, crash-safe key/value store for `vm/{id}` and `session/{id}`
/// records. Each record is one JSON file under
/// `<root>/<namespace>/<id>.json`; writes go through a temp-file-then-rename
/// to avoid ever observing a partially-written record, and an `fs2`
/// advisory lock on the record's lockfile serializes `conditional_put`
/// across processes sharing the same data directory.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
}

impl CatalogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CatalogStore { root: root.into() }
    }

    fn ns_dir(&self, ns: &str) -> PathBuf {
        self.root.join(ns)
    }

    fn record_path(&self, ns: &str, id: &str) -> PathBuf {
        self.ns_dir(ns).join(format!("{id}.json"))
    }

    fn lock_path(&self, ns: &str, id: &str) -> PathBuf {
        self.ns_dir(ns).join(format!("{id}.lock"))
    }

    /// Fetch a record; returns `Ok(None)` when missing.
    pub async fn get<T: DeserializeOwned + Send + 'static>(&self, ns: &str, id: &str) -> Result<Option<T>> {
        let path = self.record_path(ns, id);
        tokio::task::spawn_blocking(move || read_record(&path))
            .await
            .map_err(|e| Error::Internal(format!("catalog get task panicked: {e}")))?
    }

    /// Unconditional write with create-if-absent or overwrite semantics.
    pub async fn conditional_put<T: Serialize + Send + 'static>(
        &self,
        ns: &str,
        id: &str,
        record: &T,
        precondition: Precondition,
    ) -> Result<()> {
        let dir = self.ns_dir(ns);
        let path = self.record_path(ns, id);
        let lock_path = self.lock_path(ns, id);
        let json = serde_json::to_vec_pretty(record).map_err(Error::from)?;

        tokio::task::spawn_blocking(move || write_record(&dir, &path, &lock_path, &json, precondition))
            .await
            .map_err(|e| Error::Internal(format!("catalog put task panicked: {e}")))?
    }

    /// Convenience wrapper: unconditional overwrite.
    pub async fn put<T: Serialize + Send + 'static>(&self, ns: &str, id: &str, record: &T) -> Result<()> {
        self.conditional_put(ns, id, record, Precondition::Any).await
    }

    /// Idempotent delete.
    pub async fn delete(&self, ns: &str, id: &str) -> Result<()> {
        let path = self.record_path(ns, id);
        let lock_path = self.lock_path(ns, id);
        tokio::task::spawn_blocking(move || {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::from(e)),
            }
            let _ = std::fs::remove_file(&lock_path);
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("catalog delete task panicked: {e}")))?
    }

    /// Snapshot listing of every record currently in `ns`. No guarantee of
    /// reflecting writes that start concurrently with the call.
    pub async fn list<T: DeserializeOwned + Send + 'static>(&self, ns: &str) -> Result<Vec<T>> {
        let dir = self.ns_dir(ns);
        tokio::task::spawn_blocking(move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(Error::from(e)),
            };
            let mut records = Vec::new();
            for entry in entries {
                let entry = entry.map_err(Error::from)?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(record) = read_record::<T>(&path)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
        .map_err(|e| Error::Internal(format!("catalog list task panicked: {e}")))?
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::from(e)),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(Error::from)?;
    let record = serde_json::from_str(&contents).map_err(Error::from)?;
    Ok(Some(record))
}

fn write_record(dir: &Path, path: &Path, lock_path: &Path, json: &[u8], precondition: Precondition) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(Error::from)?;

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(Error::from)?;
    lock_file.lock_exclusive().map_err(Error::from)?;

    let result = (|| {
        if precondition == Precondition::Absent && path.exists() {
            return Err(Error::Conflict(format!("record already exists: {}", path.display())));
        }

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(Error::from)?;
        tmp.write_all(json).map_err(Error::from)?;
        tmp.as_file().sync_all().map_err(Error::from)?;
        tmp.persist(path)
            .map_err(|e| Error::IoError(format!("persisting catalog record: {e}")))?;
        Ok(())
    })();

    let _ = fs2::FileExt::unlock(&lock_file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        count: u32,
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        let w = Widget { id: "a".into(), count: 1 };
        store.put("vm", "a", &w).await.unwrap();

        let got: Option<Widget> = store.get("vm", "a").await.unwrap();
        assert_eq!(got, Some(w));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        let got: Option<Widget> = store.get("vm", "nope").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn conditional_put_absent_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        let w = Widget { id: "a".into(), count: 1 };
        store.conditional_put("session", "a", &w, Precondition::Absent).await.unwrap();

        let err = store
            .conditional_put("session", "a", &w, Precondition::Absent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        let w = Widget { id: "a".into(), count: 1 };
        store.put("vm", "a", &w).await.unwrap();
        store.delete("vm", "a").await.unwrap();
        store.delete("vm", "a").await.unwrap();

        let got: Option<Widget> = store.get("vm", "a").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn list_snapshots_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        for i in 0..3 {
            let w = Widget { id: format!("w{i}"), count: i };
            store.put("vm", &w.id, &w).await.unwrap();
        }
        let all: Vec<Widget> = store.list("vm").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn list_on_missing_namespace_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        let all: Vec<Widget> = store.list("vm").await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn crash_mid_write_never_exposes_partial_record() {
        // A successful put is followed by a fresh read that either sees the
        // old value or the new one in full — never a torn write, because
        // writes land via tempfile + rename.
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path());
        let w1 = Widget { id: "a".into(), count: 1 };
        let w2 = Widget { id: "a".into(), count: 2 };
        store.put("vm", "a", &w1).await.unwrap();
        store.put("vm", "a", &w2).await.unwrap();
        let got: Option<Widget> = store.get("vm", "a").await.unwrap();
        assert_eq!(got, Some(w2));
    }
}
