use std::sync::Arc;

use era_core::audit::AuditLog;
use era_core::config::EraConfig;
use era_core::logging::LogFormat;
use era_launcher::Launcher;
use era_storage::{CatalogStore, LocalVolumeBackend, SessionObjectStore, VolumeBackend};
use era_vm::VmService;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// `erad` is both the one-off CLI front door and, under the `daemon`
/// subcommand, the long-running reconciler/reaper process. There is no
/// network server: the two share state only through the on-disk catalog
/// and object store.
fn main() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("daemon") {
        era_core::logging::init(LogFormat::Json);
        return run_daemon();
    }

    era_core::logging::init(LogFormat::Human);
    era_cli::run()
}

fn run_daemon() -> anyhow::Result<()> {
    let config = EraConfig::load(None)?;
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.object_store_root)?;

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let catalog = CatalogStore::new(config.data_dir.join("catalog"));
        let volumes: Arc<dyn VolumeBackend> = Arc::new(LocalVolumeBackend::new(config.data_dir.join("vms")));
        let launcher: Arc<dyn Launcher> = Arc::new(era_launcher::process::ProcessLauncher::new());
        let audit = AuditLog::new(config.data_dir.join("audit.log"));
        let objects = SessionObjectStore::new(config.object_store_root.to_string_lossy())?;

        let vm_service = Arc::new(VmService::new(catalog.clone(), volumes, launcher, audit.clone(), config.clone()));
        tracing::info!("reconciling vm catalog against launcher state");
        vm_service.reconcile().await?;

        let setup = Arc::new(era_setup::SetupOrchestrator::new(
            catalog,
            vm_service.clone(),
            objects,
            audit,
            config.clone(),
        ));
        tracing::info!("reconciling orphaned setup jobs");
        setup.reconcile_orphaned().await?;
        setup.spawn_reaper(std::time::Duration::from_secs(30));

        tracing::info!("erad daemon ready, watching for shutdown signal");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        ctrlc::set_handler(move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        })?;
        let _ = rx.await;
        tracing::info!("shutting down");
        anyhow::Ok(())
    })
}
