use bytes::Bytes;
use era_core::error::{Error, Result};
use opendal::{Operator, services::Fs};

/// Durable storage for session files, keyed `sessions/{id}/{rel_path}`.
/// Backed by `opendal`'s filesystem service so a future deployment can
/// swap in an object-storage service without touching call sites.
#[derive(Clone)]
pub struct SessionObjectStore {
    op: Operator,
}

impl SessionObjectStore {
    pub fn new(root: impl AsRef<str>) -> Result<Self> {
        let builder = Fs::default().root(root.as_ref());
        let op = Operator::new(builder)
            .map_err(|e| Error::Internal(format!("constructing object store: {e}")))?
            .finish();
        Ok(SessionObjectStore { op })
    }

    fn key(session_id: &str, rel_path: &str) -> String {
        format!("sessions/{session_id}/{rel_path}")
    }

    pub async fn put(&self, session_id: &str, rel_path: &str, bytes: Bytes) -> Result<()> {
        self.op
            .write(&Self::key(session_id, rel_path), bytes)
            .await
            .map_err(|e| Error::IoError(format!("writing session file: {e}")))?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str, rel_path: &str) -> Result<Option<Bytes>> {
        match self.op.read(&Self::key(session_id, rel_path)).await {
            Ok(buf) => Ok(Some(buf.to_bytes())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoError(format!("reading session file: {e}"))),
        }
    }

    pub async fn delete(&self, session_id: &str, rel_path: &str) -> Result<()> {
        self.op
            .delete(&Self::key(session_id, rel_path))
            .await
            .map_err(|e| Error::IoError(format!("deleting session file: {e}")))?;
        Ok(())
    }

    /// Delete every file under a session's prefix, for full session teardown.
    pub async fn delete_all(&self, session_id: &str) -> Result<()> {
        let prefix = format!("sessions/{session_id}/");
        self.op
            .remove_all(&prefix)
            .await
            .map_err(|e| Error::IoError(format!("deleting session tree: {e}")))?;
        Ok(())
    }

    /// List every file recorded for a session, relative to the session root.
    pub async fn list(&self, session_id: &str) -> Result<Vec<String>> {
        let prefix = format!("sessions/{session_id}/");
        let entries = self
            .op
            .list(&prefix)
            .await
            .map_err(|e| Error::IoError(format!("listing session files: {e}")))?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.metadata().is_dir())
            .filter_map(|e| e.path().strip_prefix(&prefix).map(|s| s.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionObjectStore::new(dir.path().to_str().unwrap()).unwrap();

        store.put("s1", "main.py", Bytes::from_static(b"print(1)")).await.unwrap();
        let got = store.get("s1", "main.py").await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"print(1)")));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionObjectStore::new(dir.path().to_str().unwrap()).unwrap();
        let got = store.get("s1", "nope.txt").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn list_and_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionObjectStore::new(dir.path().to_str().unwrap()).unwrap();

        store.put("s1", "a.txt", Bytes::from_static(b"a")).await.unwrap();
        store.put("s1", "sub/b.txt", Bytes::from_static(b"b")).await.unwrap();

        let mut files = store.list("s1").await.unwrap();
        files.sort();
        assert_eq!(files, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);

        store.delete_all("s1").await.unwrap();
        let files = store.list("s1").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionObjectStore::new(dir.path().to_str().unwrap()).unwrap();

        store.put("s1", "a.txt", Bytes::from_static(b"s1")).await.unwrap();
        store.put("s2", "a.txt", Bytes::from_static(b"s2")).await.unwrap();

        assert_eq!(store.get("s1", "a.txt").await.unwrap(), Some(Bytes::from_static(b"s1")));
        assert_eq!(store.get("s2", "a.txt").await.unwrap(), Some(Bytes::from_static(b"s2")));
    }
}
