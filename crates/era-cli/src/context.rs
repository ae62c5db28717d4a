use std::sync::Arc;

use era_core::audit::AuditLog;
use era_core::config::EraConfig;
use era_launcher::Launcher;
use era_session::SessionService;
use era_setup::SetupOrchestrator;
use era_storage::{CatalogStore, LocalVolumeBackend, SessionObjectStore};
use era_vm::VmService;

/// Every service wired up fresh for a single CLI invocation. There is no
/// long-lived CLI process: each command constructs this, does its work,
/// and exits, sharing on-disk catalog/object-store state with whatever
/// `erad` daemon is running the background reaper and reconciler.
pub struct Context {
    pub config: EraConfig,
    pub vm_service: Arc<VmService>,
    pub session_service: Arc<SessionService>,
    pub setup: Arc<SetupOrchestrator>,
}

impl Context {
    pub fn build(config: EraConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.object_store_root)?;

        let catalog = CatalogStore::new(config.data_dir.join("catalog"));
        let volumes: Arc<dyn era_storage::VolumeBackend> =
            Arc::new(LocalVolumeBackend::new(config.data_dir.join("vms")));
        let launcher: Arc<dyn Launcher> = match config.launcher_kind.as_str() {
            "mock" => Arc::new(era_launcher::mock::MockLauncher::new()),
            _ => Arc::new(era_launcher::process::ProcessLauncher::new()),
        };
        let audit = AuditLog::new(config.data_dir.join("audit.log"));
        let objects = SessionObjectStore::new(config.object_store_root.to_string_lossy())?;

        let vm_service = Arc::new(VmService::new(catalog.clone(), volumes, launcher, audit.clone(), config.clone()));
        let setup = Arc::new(SetupOrchestrator::new(
            catalog.clone(),
            vm_service.clone(),
            objects.clone(),
            audit.clone(),
            config.clone(),
        ));
        let session_service = Arc::new(SessionService::new(
            catalog,
            objects,
            vm_service.clone(),
            setup.clone(),
            audit,
            config.clone(),
        ));

        Ok(Context { config, vm_service, session_service, setup })
    }
}
