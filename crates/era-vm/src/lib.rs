use std::collections::HashMap;
use std::sync::Arc;

use era_core::audit::{AuditAction, AuditLog};
use era_core::config::EraConfig;
use era_core::error::{Error, Result};
use era_core::language::Language;
use era_core::naming::{generate_vm_id, validate_relative_path};
use era_core::record::{NetworkMode, VmRecord, VmStatus, validate_vm_transition};
use era_core::time::utc_now;
use era_launcher::{Launcher, RunOptions as LauncherRunOptions};
use era_storage::{CatalogStore, Precondition, VolumeBackend};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

const CATALOG_NS: &str = "vm";

/// Inputs to [`VmService::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub language: Language,
    pub cpu_count: u32,
    pub memory_mib: u32,
    pub network_mode: NetworkMode,
    pub persist: bool,
    pub image_ref: Option<String>,
}

/// Inputs to [`VmService::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub command: String,
    pub timeout: std::time::Duration,
    pub env: HashMap<String, String>,
    pub staged_file: Option<std::path::PathBuf>,
}

/// Result of [`VmService::run`].
#[derive(Debug, Clone)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: std::time::Duration,
}

/// Whitelisted mutable VM fields for [`VmService::patch`].
#[derive(Debug, Clone, Default)]
pub struct VmPatch {
    pub network_mode: Option<NetworkMode>,
    pub cpu_count: Option<u32>,
    pub memory_mib: Option<u32>,
    pub allow_internet: Option<bool>,
}

struct FileEntry {
    pub path: String,
    pub size: u64,
}

/// VM lifecycle service: owns every `VmRecord` mutation, serializes
/// concurrent operations on the same VM behind a per-id mutex, and
/// reconciles catalog state against the launcher backend at startup.
pub struct VmService {
    catalog: CatalogStore,
    volumes: Arc<dyn VolumeBackend>,
    launcher: Arc<dyn Launcher>,
    audit: AuditLog,
    config: EraConfig,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl VmService {
    pub fn new(
        catalog: CatalogStore,
        volumes: Arc<dyn VolumeBackend>,
        launcher: Arc<dyn Launcher>,
        audit: AuditLog,
        config: EraConfig,
    ) -> Self {
        VmService { catalog, volumes, launcher, audit, config, locks: RwLock::new(HashMap::new()) }
    }

    /// In production, `network_mode: full` is refused unless the launcher
    /// backend is something other than the plain process launcher — that
    /// backend models the guest-volume contract over a host subprocess tree
    /// and provides no real network isolation, so granting it outbound
    /// internet access in production would be ungated, not sandboxed.
    fn check_network_mode(&self, mode: NetworkMode) -> Result<()> {
        if self.config.is_production() && mode == NetworkMode::Full && self.config.launcher_kind == "process" {
            return Err(Error::FailedPrecondition(
                "network_mode: full is refused in production without a sandboxed launcher backend".to_string(),
            ));
        }
        Ok(())
    }

    async fn lock_for(&self, vm_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(vm_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(vm_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    #[instrument(skip_all, fields(language = %opts.language))]
    pub async fn create(&self, opts: CreateOptions) -> Result<VmRecord> {
        if opts.cpu_count == 0 {
            return Err(Error::InvalidArgument("cpu_count must be >= 1".to_string()));
        }
        if opts.memory_mib < 64 {
            return Err(Error::InvalidArgument("memory_mib must be >= 64".to_string()));
        }
        self.check_network_mode(opts.network_mode)?;

        let id = generate_vm_id(opts.language);
        let volume = self.volumes.create(&id).await?;
        let allow_internet = opts.network_mode.allows_internet();

        let mut record = VmRecord {
            id: id.clone(),
            language: opts.language,
            status: VmStatus::Pending,
            cpu_count: opts.cpu_count,
            memory_mib: opts.memory_mib,
            network_mode: opts.network_mode,
            persist: opts.persist,
            image_ref: opts.image_ref.unwrap_or_else(|| "default".to_string()),
            workdir_path: volume.path().to_string_lossy().to_string(),
            created_at: utc_now(),
            last_run_at: None,
            allow_internet,
        };

        self.catalog.conditional_put(CATALOG_NS, &id, &record, Precondition::Absent).await?;

        match self.launcher.launch(&record).await {
            Ok(()) => {
                record.status = VmStatus::Running;
            }
            Err(e) => {
                warn!(vm_id = %id, error = %e, "launch failed, VM left in errored state");
                record.status = VmStatus::Errored;
            }
        }
        self.catalog.put(CATALOG_NS, &id, &record).await?;
        self.audit.log(&id, AuditAction::VmCreated, None).await.ok();
        info!(vm_id = %id, status = %record.status, "vm created");
        Ok(record)
    }

    #[instrument(skip_all, fields(vm_id))]
    pub async fn run(&self, vm_id: &str, opts: RunOptions) -> Result<RunResult> {
        let lock = self.lock_for(vm_id).await;
        let _guard = lock.lock().await;

        let mut record: VmRecord = self
            .catalog
            .get(CATALOG_NS, vm_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("vm {vm_id}")))?;

        if record.status == VmStatus::Stopped {
            self.launcher.launch(&record).await?;
            validate_vm_transition(record.status, VmStatus::Running).map_err(Error::FailedPrecondition)?;
            record.status = VmStatus::Running;
            self.catalog.put(CATALOG_NS, vm_id, &record).await?;
        }
        if record.status != VmStatus::Running {
            return Err(Error::FailedPrecondition(format!(
                "vm {vm_id} is {}, cannot run",
                record.status
            )));
        }

        let outcome = self
            .launcher
            .run(
                &record,
                LauncherRunOptions {
                    command: opts.command,
                    timeout: opts.timeout,
                    env: opts.env,
                    staged_file: opts.staged_file,
                },
            )
            .await?;

        record.last_run_at = Some(utc_now());
        self.catalog.put(CATALOG_NS, vm_id, &record).await?;

        Ok(RunResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            duration: outcome.duration,
        })
    }

    #[instrument(skip_all, fields(vm_id))]
    pub async fn stop(&self, vm_id: &str) -> Result<()> {
        let lock = self.lock_for(vm_id).await;
        let _guard = lock.lock().await;

        let Some(mut record) = self.catalog.get::<VmRecord>(CATALOG_NS, vm_id).await? else {
            return Ok(());
        };
        if record.status == VmStatus::Stopped {
            return Ok(());
        }
        self.launcher.stop(vm_id).await?;
        validate_vm_transition(record.status, VmStatus::Stopped).map_err(Error::FailedPrecondition)?;
        record.status = VmStatus::Stopped;
        self.catalog.put(CATALOG_NS, vm_id, &record).await?;
        self.audit.log(vm_id, AuditAction::VmStopped, None).await.ok();
        Ok(())
    }

    #[instrument(skip_all, fields(vm_id))]
    pub async fn clean(&self, vm_id: &str, keep_persist: bool) -> Result<()> {
        let lock = self.lock_for(vm_id).await;
        let _guard = lock.lock().await;

        let record: Option<VmRecord> = self.catalog.get(CATALOG_NS, vm_id).await?;
        if let Some(rec) = &record {
            if rec.status == VmStatus::Running {
                self.launcher.stop(vm_id).await?;
            }
        }
        self.launcher.cleanup(vm_id).await?;

        let persist = record.as_ref().map(|r| r.persist).unwrap_or(false);
        if !(persist && keep_persist) {
            self.volumes.remove(vm_id).await?;
        }
        self.catalog.delete(CATALOG_NS, vm_id).await?;
        self.audit.log(vm_id, AuditAction::VmCleaned, None).await.ok();
        Ok(())
    }

    pub async fn get(&self, vm_id: &str) -> Result<VmRecord> {
        self.catalog
            .get(CATALOG_NS, vm_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("vm {vm_id}")))
    }

    pub async fn list(&self, status: Option<VmStatus>) -> Result<Vec<VmRecord>> {
        let all: Vec<VmRecord> = self.catalog.list(CATALOG_NS).await?;
        Ok(match status {
            Some(s) => all.into_iter().filter(|r| r.status == s).collect(),
            None => all,
        })
    }

    #[instrument(skip_all, fields(vm_id))]
    pub async fn patch(&self, vm_id: &str, patch: VmPatch) -> Result<VmRecord> {
        let lock = self.lock_for(vm_id).await;
        let _guard = lock.lock().await;

        let mut record: VmRecord = self
            .catalog
            .get(CATALOG_NS, vm_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("vm {vm_id}")))?;

        if let Some(mode) = patch.network_mode {
            self.check_network_mode(mode)?;
            record.network_mode = mode;
        }
        if let Some(cpu) = patch.cpu_count {
            if cpu == 0 {
                return Err(Error::InvalidArgument("cpu_count must be >= 1".to_string()));
            }
            record.cpu_count = cpu;
        }
        if let Some(mem) = patch.memory_mib {
            if mem < 64 {
                return Err(Error::InvalidArgument("memory_mib must be >= 64".to_string()));
            }
            record.memory_mib = mem;
        }
        if let Some(allow) = patch.allow_internet {
            record.allow_internet = allow;
        }

        self.catalog.put(CATALOG_NS, vm_id, &record).await?;
        Ok(record)
    }

    pub async fn upload_file(&self, vm_id: &str, rel_path: &str, bytes: &[u8]) -> Result<u64> {
        validate_relative_path(rel_path).map_err(Error::InvalidArgument)?;
        let record = self.get(vm_id).await?;
        let dest = std::path::Path::new(&record.workdir_path).join(rel_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::from)?;
        }
        tokio::fs::write(&dest, bytes).await.map_err(Error::from)?;
        Ok(bytes.len() as u64)
    }

    pub async fn download_file(&self, vm_id: &str, rel_path: &str) -> Result<Vec<u8>> {
        validate_relative_path(rel_path).map_err(Error::InvalidArgument)?;
        let record = self.get(vm_id).await?;
        let src = std::path::Path::new(&record.workdir_path).join(rel_path);
        tokio::fs::read(&src).await.map_err(Error::from)
    }

    pub async fn list_files(&self, vm_id: &str) -> Result<Vec<(String, u64)>> {
        let record = self.get(vm_id).await?;
        let root = std::path::PathBuf::from(&record.workdir_path);
        let mut out = Vec::new();
        collect_files(&root, &root, &mut out).await?;
        Ok(out.into_iter().map(|e| (e.path, e.size)).collect())
    }

    /// Startup reconciliation: VMs the launcher doesn't know about are
    /// downgraded from `running` to `stopped`; launcher-known VMs with no
    /// catalog entry are cleaned.
    pub async fn reconcile(&self) -> Result<()> {
        let known = self.launcher.list().await?;
        let known: std::collections::HashSet<String> = known.into_iter().collect();

        let records: Vec<VmRecord> = self.catalog.list(CATALOG_NS).await?;
        for mut record in records {
            if record.status == VmStatus::Running && !known.contains(&record.id) {
                record.status = VmStatus::Stopped;
                self.catalog.put(CATALOG_NS, &record.id, &record).await?;
                warn!(vm_id = %record.id, "reconciliation: launcher has no record of running vm, downgraded to stopped");
            }
        }

        let catalog_ids: std::collections::HashSet<String> =
            self.catalog.list::<VmRecord>(CATALOG_NS).await?.into_iter().map(|r| r.id).collect();
        for id in known.difference(&catalog_ids) {
            warn!(vm_id = %id, "reconciliation: launcher knows a vm missing from the catalog, cleaning");
            self.launcher.cleanup(id).await.ok();
        }
        Ok(())
    }
}

async fn collect_files(root: &std::path::Path, dir: &std::path::Path, out: &mut Vec<FileEntry>) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(Error::from)?;
    while let Some(entry) = entries.next_entry().await.map_err(Error::from)? {
        let path = entry.path();
        let meta = entry.metadata().await.map_err(Error::from)?;
        if meta.is_dir() {
            Box::pin(collect_files(root, &path, out)).await?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().to_string();
            out.push(FileEntry { path: rel, size: meta.len() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use era_launcher::mock::MockLauncher;
    use era_storage::LocalVolumeBackend;

    async fn harness() -> (VmService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::new(dir.path().join("catalog"));
        let volumes: Arc<dyn VolumeBackend> = Arc::new(LocalVolumeBackend::new(dir.path().join("vms")));
        let launcher: Arc<dyn Launcher> = Arc::new(MockLauncher::new());
        let audit = AuditLog::new(dir.path().join("audit.log"));
        (VmService::new(catalog, volumes, launcher, audit, EraConfig::default()), dir)
    }

    fn default_create(language: Language) -> CreateOptions {
        CreateOptions {
            language,
            cpu_count: 1,
            memory_mib: 256,
            network_mode: NetworkMode::None,
            persist: false,
            image_ref: None,
        }
    }

    #[tokio::test]
    async fn create_transitions_to_running() {
        let (svc, _dir) = harness().await;
        let vm = svc.create(default_create(Language::Python)).await.unwrap();
        assert_eq!(vm.status, VmStatus::Running);
        assert!(vm.id.starts_with("python-"));
    }

    #[tokio::test]
    async fn create_rejects_zero_cpu() {
        let (svc, _dir) = harness().await;
        let mut opts = default_create(Language::Python);
        opts.cpu_count = 0;
        assert!(matches!(svc.create(opts).await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn run_then_stop_then_clean() {
        let (svc, _dir) = harness().await;
        let vm = svc.create(default_create(Language::Python)).await.unwrap();

        let result = svc
            .run(&vm.id, RunOptions { command: "true".into(), timeout: std::time::Duration::from_secs(5), env: Default::default(), staged_file: None })
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);

        svc.stop(&vm.id).await.unwrap();
        let stopped = svc.get(&vm.id).await.unwrap();
        assert_eq!(stopped.status, VmStatus::Stopped);

        svc.clean(&vm.id, false).await.unwrap();
        assert!(matches!(svc.get(&vm.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn run_on_stopped_vm_relaunches() {
        let (svc, _dir) = harness().await;
        let vm = svc.create(default_create(Language::Python)).await.unwrap();
        svc.stop(&vm.id).await.unwrap();

        let result = svc
            .run(&vm.id, RunOptions { command: "true".into(), timeout: std::time::Duration::from_secs(5), env: Default::default(), staged_file: None })
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        let vm = svc.get(&vm.id).await.unwrap();
        assert_eq!(vm.status, VmStatus::Running);
    }

    #[tokio::test]
    async fn patch_rejects_invalid_cpu() {
        let (svc, _dir) = harness().await;
        let vm = svc.create(default_create(Language::Python)).await.unwrap();
        let err = svc.patch(&vm.id, VmPatch { cpu_count: Some(0), ..Default::default() }).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn file_round_trip() {
        let (svc, _dir) = harness().await;
        let vm = svc.create(default_create(Language::Python)).await.unwrap();

        svc.upload_file(&vm.id, "main.py", b"print(1)").await.unwrap();
        let bytes = svc.download_file(&vm.id, "main.py").await.unwrap();
        assert_eq!(bytes, b"print(1)");

        let files = svc.list_files(&vm.id).await.unwrap();
        assert_eq!(files, vec![("main.py".to_string(), 8u64)]);
    }

    #[tokio::test]
    async fn upload_file_rejects_traversal() {
        let (svc, _dir) = harness().await;
        let vm = svc.create(default_create(Language::Python)).await.unwrap();
        let err = svc.upload_file(&vm.id, "../escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (svc, _dir) = harness().await;
        let a = svc.create(default_create(Language::Python)).await.unwrap();
        let _b = svc.create(default_create(Language::Node)).await.unwrap();
        svc.stop(&a.id).await.unwrap();

        let running = svc.list(Some(VmStatus::Running)).await.unwrap();
        assert_eq!(running.len(), 1);
        let stopped = svc.list(Some(VmStatus::Stopped)).await.unwrap();
        assert_eq!(stopped.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_downgrades_unknown_running_vms() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::new(dir.path().join("catalog"));
        let volumes: Arc<dyn VolumeBackend> = Arc::new(LocalVolumeBackend::new(dir.path().join("vms")));
        let launcher: Arc<dyn Launcher> = Arc::new(MockLauncher::new());
        let audit = AuditLog::new(dir.path().join("audit.log"));
        let svc = VmService::new(catalog, volumes.clone(), launcher, audit, EraConfig::default());

        let vm = svc.create(default_create(Language::Python)).await.unwrap();
        assert_eq!(vm.status, VmStatus::Running);

        // A freshly started process whose launcher backend has no memory of
        // this VM (e.g. the host rebooted) should observe it downgraded.
        let catalog2 = CatalogStore::new(dir.path().join("catalog"));
        let fresh_launcher: Arc<dyn Launcher> = Arc::new(MockLauncher::new());
        let audit2 = AuditLog::new(dir.path().join("audit.log"));
        let svc2 = VmService::new(catalog2, volumes, fresh_launcher, audit2, EraConfig::default());

        svc2.reconcile().await.unwrap();
        assert_eq!(svc2.get(&vm.id).await.unwrap().status, VmStatus::Stopped);
    }

    #[tokio::test]
    async fn production_refuses_full_network_on_process_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::new(dir.path().join("catalog"));
        let volumes: Arc<dyn VolumeBackend> = Arc::new(LocalVolumeBackend::new(dir.path().join("vms")));
        let launcher: Arc<dyn Launcher> = Arc::new(MockLauncher::new());
        let audit = AuditLog::new(dir.path().join("audit.log"));
        let config = EraConfig { production: true, ..EraConfig::default() };
        let svc = VmService::new(catalog, volumes, launcher, audit, config);

        let mut opts = default_create(Language::Python);
        opts.network_mode = NetworkMode::Full;
        let err = svc.create(opts).await.unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn non_production_allows_full_network_on_process_launcher() {
        let (svc, _dir) = harness().await;
        let mut opts = default_create(Language::Python);
        opts.network_mode = NetworkMode::Full;
        let vm = svc.create(opts).await.unwrap();
        assert_eq!(vm.network_mode, NetworkMode::Full);
    }
}
