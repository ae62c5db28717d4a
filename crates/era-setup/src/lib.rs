use std::sync::Arc;

use era_core::audit::{AuditAction, AuditLog};
use era_core::config::EraConfig;
use era_core::error::{Error, Result};
use era_core::record::{SessionRecord, SetupInstalled, SetupResult, SetupSpec, SetupStatus, validate_setup_transition};
use era_storage::{CatalogStore, SessionObjectStore};
use era_vm::{CreateOptions, RunOptions, VmService};
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

const CATALOG_NS: &str = "session";
const STDERR_TAIL_MAX_BYTES: usize = 4096;

/// Background job runner that installs a session's declared dependencies
/// once, in a dedicated VM, and extracts the resulting files back into
/// the session's object-store prefix. Multiple sessions progress in
/// parallel up to a global concurrency cap; within one session the
/// install groups run sequentially.
pub struct SetupOrchestrator {
    catalog: CatalogStore,
    vm_service: Arc<VmService>,
    objects: SessionObjectStore,
    audit: AuditLog,
    config: EraConfig,
    semaphore: Arc<Semaphore>,
}

impl SetupOrchestrator {
    pub fn new(catalog: CatalogStore, vm_service: Arc<VmService>, objects: SessionObjectStore, audit: AuditLog, config: EraConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.setup_concurrency.max(1)));
        SetupOrchestrator { catalog, vm_service, objects, audit, config, semaphore }
    }

    /// Enqueue a session's setup job. Spawns a task that waits for a
    /// concurrency slot (FIFO via the semaphore's internal queue) and then
    /// runs the full install-and-extract sequence.
    pub fn enqueue(self: &Arc<Self>, session_id: String) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let permit = orchestrator.semaphore.clone().acquire_owned().await;
            if let Ok(_permit) = permit {
                if let Err(e) = orchestrator.run(&session_id).await {
                    warn!(session_id = %session_id, error = %e, "setup job failed to run to completion");
                }
            }
        });
    }

    #[instrument(skip_all, fields(session_id))]
    async fn run(&self, session_id: &str) -> Result<()> {
        let mut session: SessionRecord = self
            .catalog
            .get(CATALOG_NS, session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        let spec = session.setup.clone().unwrap_or_default();
        if spec.is_empty() {
            return Ok(());
        }

        self.transition(&mut session, SetupStatus::Running).await?;
        self.audit.log(session_id, AuditAction::SetupStarted, None).await.ok();

        let started = std::time::Instant::now();
        let vm = self
            .vm_service
            .create(CreateOptions {
                language: session.language.setup_language(),
                cpu_count: self.config.default_cpu_count,
                memory_mib: self.config.setup_memory_mib,
                network_mode: era_core::record::NetworkMode::Full,
                persist: false,
                image_ref: None,
            })
            .await?;

        let outcome = self.install_groups(&vm.id, &spec).await;

        let (installed, stdout_tail, stderr_tail, error) = match &outcome {
            Ok(installed) => (installed.clone(), String::new(), String::new(), None),
            Err((partial, stdout, stderr, err)) => (partial.clone(), stdout.clone(), stderr.clone(), Some(err.clone())),
        };

        if outcome.is_ok() {
            if let Err(e) = self.extract_files(session_id, &vm.id).await {
                warn!(session_id = %session_id, error = %e, "extracting setup artifacts failed, session proceeds without them");
            }
        }

        self.vm_service.clean(&vm.id, false).await.ok();

        let result = SetupResult {
            duration_ms: started.elapsed().as_millis() as u64,
            installed,
            stdout_tail,
            stderr_tail,
            error: error.clone(),
        };

        let mut session: SessionRecord = self
            .catalog
            .get(CATALOG_NS, session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.setup_result = Some(result);
        let final_status = if error.is_some() { SetupStatus::Failed } else { SetupStatus::Completed };
        self.transition(&mut session, final_status).await?;

        let action = if final_status == SetupStatus::Completed { AuditAction::SetupCompleted } else { AuditAction::SetupFailed };
        self.audit.log(session_id, action, error).await.ok();
        info!(session_id = %session_id, status = %final_status, "setup job finished");
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    async fn install_groups(&self, vm_id: &str, spec: &SetupSpec) -> std::result::Result<SetupInstalled, (SetupInstalled, String, String, String)> {
        let mut installed = SetupInstalled::default();
        let timeout = std::time::Duration::from_secs(self.config.setup_command_timeout_secs.max(300) as u64);

        for (group_name, packages, command_prefix) in [
            ("pip", spec.pip.clone(), "pip install --no-input"),
            ("npm", spec.npm.clone(), "npm install -g"),
            ("go", spec.go.clone(), "go install"),
        ] {
            if packages.is_empty() {
                continue;
            }
            let command = format!("{command_prefix} {}", packages.join(" "));
            let result = self
                .vm_service
                .run(vm_id, RunOptions { command, timeout, env: Default::default(), staged_file: None })
                .await
                .map_err(|e| (installed.clone(), String::new(), String::new(), e.to_string()))?;
            if result.exit_code != 0 {
                return Err((installed, tail(&result.stdout), tail(&result.stderr), format!("{group_name} install failed with exit code {}", result.exit_code)));
            }
            match group_name {
                "pip" => installed.pip = packages,
                "npm" => installed.npm = packages,
                "go" => installed.go = packages,
                _ => unreachable!(),
            }
        }

        for command in &spec.commands {
            let result = self
                .vm_service
                .run(vm_id, RunOptions { command: command.clone(), timeout, env: spec.env.clone(), staged_file: None })
                .await
                .map_err(|e| (installed.clone(), String::new(), String::new(), e.to_string()))?;
            if result.exit_code != 0 {
                return Err((installed, tail(&result.stdout), tail(&result.stderr), format!("command {command:?} failed with exit code {}", result.exit_code)));
            }
        }

        Ok(installed)
    }

    async fn extract_files(&self, session_id: &str, vm_id: &str) -> Result<()> {
        let files = self.vm_service.list_files(vm_id).await?;
        for (rel_path, _size) in files {
            if era_core::sensitive::is_sensitive_path(&rel_path) {
                continue;
            }
            let bytes = self.vm_service.download_file(vm_id, &rel_path).await?;
            let label = format!("setup extract {rel_path}");
            era_core::retry::retry(3, std::time::Duration::from_millis(100), &label, || {
                self.objects.put(session_id, &rel_path, bytes::Bytes::from(bytes.clone()))
            })
            .await?;
        }
        Ok(())
    }

    async fn transition(&self, session: &mut SessionRecord, to: SetupStatus) -> Result<()> {
        validate_setup_transition(session.setup_status, to).map_err(Error::FailedPrecondition)?;
        session.setup_status = to;
        self.catalog.put(CATALOG_NS, &session.id, session).await
    }

    /// Startup reconciliation: a `running` setup whose worker died with the
    /// process is marked `failed`. No automatic resurrection.
    pub async fn reconcile_orphaned(&self) -> Result<()> {
        let sessions: Vec<SessionRecord> = self.catalog.list(CATALOG_NS).await?;
        for mut session in sessions {
            if session.setup_status == SetupStatus::Running {
                warn!(session_id = %session.id, "reconciliation: orphaned running setup marked failed");
                session.setup_status = SetupStatus::Failed;
                session.setup_result = Some(SetupResult {
                    duration_ms: 0,
                    installed: SetupInstalled::default(),
                    stdout_tail: String::new(),
                    stderr_tail: String::new(),
                    error: Some("setup worker did not complete before process restart".to_string()),
                });
                self.catalog.put(CATALOG_NS, &session.id, &session).await?;
            }
        }
        Ok(())
    }

    /// Periodic sweep for the same orphan condition, with small jitter on
    /// the tick interval so the sweep isn't a precise timing oracle on
    /// externally observable catalog state.
    pub fn spawn_reaper(self: &Arc<Self>, base_interval: std::time::Duration) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let jitter_ms = rand::thread_rng().gen_range(0..2000);
                tokio::time::sleep(base_interval + std::time::Duration::from_millis(jitter_ms)).await;
                if let Err(e) = orchestrator.reconcile_orphaned().await {
                    warn!(error = %e, "setup reaper sweep failed");
                }
            }
        });
    }
}

fn tail(s: &str) -> String {
    if s.len() > STDERR_TAIL_MAX_BYTES {
        s[s.len() - STDERR_TAIL_MAX_BYTES..].to_string()
    } else {
        s.to_string()
    }
}
