use std::path::{Path, PathBuf};

use era_core::error::{Error, Result};

/// A VM's guest-visible workspace on the host side, before it is handed to
/// a launcher. `ProcessLauncher` bind-mounts (or, for now, directly uses)
/// this directory as `/workspace` inside the sandbox.
#[derive(Debug, Clone)]
pub struct Volume {
    root: PathBuf,
}

impl Volume {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

/// Creates and tears down per-VM workdirs. Kept as a trait so a future
/// backend (e.g. a copy-on-write image snapshot) can replace the plain
/// directory-per-VM implementation without touching callers.
#[async_trait::async_trait]
pub trait VolumeBackend: Send + Sync {
    async fn create(&self, vm_id: &str) -> Result<Volume>;
    async fn remove(&self, vm_id: &str) -> Result<()>;
    fn workdir(&self, vm_id: &str) -> PathBuf;
}

/// Plain directory-per-VM backend rooted under the configured data dir.
pub struct LocalVolumeBackend {
    root: PathBuf,
}

impl LocalVolumeBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalVolumeBackend { root: root.into() }
    }
}

#[async_trait::async_trait]
impl VolumeBackend for LocalVolumeBackend {
    async fn create(&self, vm_id: &str) -> Result<Volume> {
        let root = self.workdir(vm_id);
        tokio::fs::create_dir_all(&root).await.map_err(Error::from)?;
        Ok(Volume { root })
    }

    async fn remove(&self, vm_id: &str) -> Result<()> {
        let root = self.workdir(vm_id);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn workdir(&self, vm_id: &str) -> PathBuf {
        self.root.join(vm_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalVolumeBackend::new(dir.path());

        let vol = backend.create("python-1").await.unwrap();
        assert!(vol.path().is_dir());
        assert_eq!(vol.path(), backend.workdir("python-1"));

        backend.remove("python-1").await.unwrap();
        assert!(!vol.path().exists());
    }

    #[tokio::test]
    async fn remove_missing_workdir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalVolumeBackend::new(dir.path());
        backend.remove("never-created").await.unwrap();
    }

    #[tokio::test]
    async fn volume_join_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalVolumeBackend::new(dir.path());
        let vol = backend.create("node-1").await.unwrap();
        let entry = vol.join("main.js");
        assert_eq!(entry, vol.path().join("main.js"));
    }
}
