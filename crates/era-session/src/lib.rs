use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use era_core::audit::{AuditAction, AuditLog};
use era_core::config::EraConfig;
use era_core::error::{Error, Result};
use era_core::language::Language;
use era_core::naming::{generate_session_id, validate_relative_path, validate_session_id};
use era_core::record::{SessionRecord, SetupSpec, SetupStatus, StoredCode};
use era_core::sensitive::is_sensitive_path;
use era_core::time::utc_now;
use era_setup::SetupOrchestrator;
use era_storage::{CatalogStore, Precondition, SessionObjectStore};
use era_templates::CommandRegistry;
use era_vm::{CreateOptions, RunOptions as VmRunOptions, VmService};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

const CATALOG_NS: &str = "session";

/// Inputs to [`SessionService::create`].
#[derive(Debug, Clone)]
pub struct CreateSessionSpec {
    pub id: Option<String>,
    pub language: Language,
    pub persistent: bool,
    pub allow_internet: bool,
    pub allow_public: bool,
    pub default_timeout: Option<u32>,
    pub metadata: serde_json::Value,
    pub data: serde_json::Value,
    pub setup: Option<SetupSpec>,
}

impl Default for CreateSessionSpec {
    fn default() -> Self {
        CreateSessionSpec {
            id: None,
            language: Language::Python,
            persistent: false,
            allow_internet: false,
            allow_public: false,
            default_timeout: None,
            metadata: serde_json::Value::default(),
            data: serde_json::Value::default(),
            setup: None,
        }
    }
}

/// Whitelisted mutable session fields for [`SessionService::patch`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub default_timeout: Option<u32>,
    pub allow_internet: Option<bool>,
    pub allow_public: Option<bool>,
    pub metadata: Option<serde_json::Value>,
    pub data: Option<serde_json::Value>,
}

/// Inputs to [`SessionService::run`].
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub code: Option<String>,
    pub timeout_secs: Option<u32>,
    pub env: HashMap<String, String>,
}

/// Result of [`SessionService::run`].
#[derive(Debug, Clone)]
pub struct SessionRunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: std::time::Duration,
    pub session_id: String,
    pub data: Option<serde_json::Value>,
}

const DEFAULT_RUN_TIMEOUT_SECS: u32 = 30;
const EXTRACT_RETRY_ATTEMPTS: u32 = 3;
const SESSION_DATA_FILE: &str = ".session_data.json";

/// Owns every `SessionRecord` mutation and the object-store prefix for
/// each session. Implements the code-execution run protocol: inject code
/// and files into a fresh ephemeral VM, execute, extract results, clean
/// up, regardless of whether the run succeeded.
pub struct SessionService {
    catalog: CatalogStore,
    objects: SessionObjectStore,
    vm_service: Arc<VmService>,
    setup: Arc<SetupOrchestrator>,
    templates: CommandRegistry,
    audit: AuditLog,
    config: EraConfig,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionService {
    pub fn new(
        catalog: CatalogStore,
        objects: SessionObjectStore,
        vm_service: Arc<VmService>,
        setup: Arc<SetupOrchestrator>,
        audit: AuditLog,
        config: EraConfig,
    ) -> Self {
        SessionService {
            catalog,
            objects,
            vm_service,
            setup,
            templates: CommandRegistry::default(),
            audit,
            config,
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(session_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    #[instrument(skip_all, fields(session_id))]
    pub async fn create(&self, spec: CreateSessionSpec) -> Result<SessionRecord> {
        let id = match spec.id {
            Some(id) => {
                validate_session_id(&id).map_err(Error::InvalidArgument)?;
                id
            }
            None => generate_session_id(),
        };

        let record = SessionRecord {
            id: id.clone(),
            language: spec.language,
            persistent: spec.persistent,
            allow_internet: spec.allow_internet,
            allow_public: spec.allow_public,
            default_timeout: spec.default_timeout,
            metadata: spec.metadata,
            data: spec.data,
            stored_code: None,
            created_at: utc_now(),
            last_run_at: None,
            setup: spec.setup.clone(),
            setup_status: if spec.setup.as_ref().is_some_and(|s| !s.is_empty()) { SetupStatus::Pending } else { SetupStatus::None },
            setup_result: None,
            file_count: 0,
            total_size_bytes: 0,
        };
        record.validate_payload_size().map_err(Error::InvalidArgument)?;

        self.catalog.conditional_put(CATALOG_NS, &id, &record, Precondition::Absent).await?;
        self.audit.log(&id, AuditAction::SessionCreated, None).await.ok();

        if record.setup_status == SetupStatus::Pending {
            self.setup.enqueue(id.clone());
        }

        info!(session_id = %id, "session created");
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<SessionRecord> {
        self.catalog.get(CATALOG_NS, id).await?.ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        self.catalog.list(CATALOG_NS).await
    }

    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        if let Err(e) = self.objects.delete_all(id).await {
            warn!(session_id = %id, error = %e, "best-effort object deletion failed");
        }
        self.catalog.delete(CATALOG_NS, id).await?;
        self.audit.log(id, AuditAction::SessionDeleted, None).await.ok();
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<usize> {
        let sessions = self.list().await?;
        let count = sessions.len();
        for session in sessions {
            self.delete(&session.id).await?;
        }
        Ok(count)
    }

    #[instrument(skip_all, fields(src_id = %src_id))]
    pub async fn duplicate(&self, src_id: &str, new_id: Option<String>) -> Result<SessionRecord> {
        let src = self.get(src_id).await?;
        let new_id = match new_id {
            Some(id) => {
                validate_session_id(&id).map_err(Error::InvalidArgument)?;
                id
            }
            None => generate_session_id(),
        };

        let mut copy = src.clone();
        copy.id = new_id.clone();
        copy.created_at = utc_now();
        copy.last_run_at = None;
        copy.setup_status = SetupStatus::None;
        copy.setup_result = None;

        self.catalog.conditional_put(CATALOG_NS, &new_id, &copy, Precondition::Absent).await?;

        if src.persistent {
            let files = self.objects.list(src_id).await?;
            for rel_path in files {
                if let Some(bytes) = self.objects.get(src_id, &rel_path).await? {
                    self.objects.put(&new_id, &rel_path, bytes).await?;
                }
            }
        }

        self.audit.log(&new_id, AuditAction::SessionDuplicated, Some(format!("from {src_id}"))).await.ok();
        Ok(copy)
    }

    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn patch(&self, id: &str, patch: SessionPatch) -> Result<SessionRecord> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut record = self.get(id).await?;
        if let Some(timeout) = patch.default_timeout {
            if timeout == 0 {
                return Err(Error::InvalidArgument("default_timeout must be positive".to_string()));
            }
            record.default_timeout = Some(timeout);
        }
        if let Some(allow) = patch.allow_internet {
            record.allow_internet = allow;
        }
        if let Some(allow) = patch.allow_public {
            record.allow_public = allow;
        }
        if let Some(metadata) = patch.metadata {
            record.metadata = metadata;
        }
        if let Some(data) = patch.data {
            record.data = data;
        }
        record.validate_payload_size().map_err(Error::InvalidArgument)?;

        self.catalog.put(CATALOG_NS, id, &record).await?;
        Ok(record)
    }

    pub async fn store_code(&self, id: &str, code: String, description: Option<String>) -> Result<String> {
        let mut record = self.get(id).await?;
        let updated_at = utc_now();
        record.stored_code = Some(StoredCode { code, description, updated_at: updated_at.clone() });
        self.catalog.put(CATALOG_NS, id, &record).await?;
        Ok(updated_at)
    }

    pub async fn get_code(&self, id: &str) -> Result<Option<StoredCode>> {
        Ok(self.get(id).await?.stored_code)
    }

    pub async fn upload_session_file(&self, id: &str, rel_path: &str, bytes: Vec<u8>) -> Result<u64> {
        validate_relative_path(rel_path).map_err(Error::InvalidArgument)?;
        self.get(id).await?;
        let len = bytes.len() as u64;
        self.objects.put(id, rel_path, Bytes::from(bytes)).await?;
        Ok(len)
    }

    pub async fn download_session_file(&self, id: &str, rel_path: &str) -> Result<Vec<u8>> {
        validate_relative_path(rel_path).map_err(Error::InvalidArgument)?;
        self.get(id).await?;
        self.objects
            .get(id, rel_path)
            .await?
            .map(|b| b.to_vec())
            .ok_or_else(|| Error::NotFound(format!("file {rel_path} in session {id}")))
    }

    pub async fn list_session_files(&self, id: &str) -> Result<Vec<String>> {
        self.get(id).await?;
        self.objects.list(id).await
    }

    /// The central operation: resolve code, run it in a fresh ephemeral
    /// VM, extract the results, and always clean up the VM.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn run(&self, id: &str, request: RunRequest) -> Result<SessionRunResult> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut session = self.get(id).await?;
        if matches!(session.setup_status, SetupStatus::Pending | SetupStatus::Running) {
            return Err(Error::FailedPrecondition(format!("session {id} setup is still {}", session.setup_status)));
        }

        let timeout_secs = request
            .timeout_secs
            .or(session.default_timeout)
            .unwrap_or(DEFAULT_RUN_TIMEOUT_SECS);

        let code = match &request.code {
            Some(c) if !c.is_empty() => c.clone(),
            _ => match &session.stored_code {
                Some(stored) => stored.code.clone(),
                None => return Err(Error::InvalidArgument("no code supplied and session has no stored code".to_string())),
            },
        };

        let network_mode = if session.allow_internet { era_core::record::NetworkMode::Full } else { era_core::record::NetworkMode::None };
        let vm = self
            .vm_service
            .create(CreateOptions {
                language: session.language,
                cpu_count: self.config.default_cpu_count,
                memory_mib: self.config.default_memory_mib,
                network_mode,
                persist: false,
                image_ref: None,
            })
            .await?;

        let run_outcome = self.run_in_vm(&vm.id, &mut session, &code, timeout_secs, request.env).await;

        self.vm_service.clean(&vm.id, false).await.ok();

        let outcome = run_outcome?;
        session.last_run_at = Some(utc_now());
        self.catalog.put(CATALOG_NS, id, &session).await?;

        Ok(SessionRunResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            duration: outcome.duration,
            session_id: id.to_string(),
            data: outcome.data,
        })
    }

    async fn run_in_vm(
        &self,
        vm_id: &str,
        session: &mut SessionRecord,
        code: &str,
        timeout_secs: u32,
        request_env: HashMap<String, String>,
    ) -> Result<InternalRunOutcome> {
        let entrypoint_rel = session.language.entrypoint();
        self.vm_service.upload_file(vm_id, entrypoint_rel, code.as_bytes()).await?;

        if session.persistent {
            let files = self.objects.list(&session.id).await?;
            for rel_path in files {
                if let Some(bytes) = self.objects.get(&session.id, &rel_path).await? {
                    self.vm_service.upload_file(vm_id, &rel_path, &bytes).await?;
                }
            }
        }

        let data_bytes = serde_json::to_vec(&session.data).map_err(Error::from)?;
        self.vm_service.upload_file(vm_id, SESSION_DATA_FILE, &data_bytes).await?;

        let mut env = request_env;
        env.insert("ERA_SESSION_ID".to_string(), session.id.clone());
        env.insert("ERA_LANGUAGE".to_string(), session.language.to_string());
        env.insert("ERA_SESSION".to_string(), "true".to_string());
        if session.allow_public {
            env.insert("ERA_PROXY_URL".to_string(), format!("http://proxy.internal/sessions/{}", session.id));
        }

        let command = if session.language == Language::Shell { code.to_string() } else { self.templates.render(session.language)? };

        let outcome = self
            .vm_service
            .run(vm_id, VmRunOptions { command, timeout: std::time::Duration::from_secs(timeout_secs as u64), env, staged_file: None })
            .await?;

        let mut data = None;
        if let Ok(raw) = self.vm_service.download_file(vm_id, SESSION_DATA_FILE).await {
            if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&raw) {
                if parsed != session.data {
                    session.data = parsed.clone();
                    data = Some(parsed);
                }
            }
        }

        if session.persistent {
            self.extract_persistent_files(vm_id, session).await;
        }

        Ok(InternalRunOutcome { exit_code: outcome.exit_code, stdout: outcome.stdout, stderr: outcome.stderr, duration: outcome.duration, data })
    }

    async fn extract_persistent_files(&self, vm_id: &str, session: &mut SessionRecord) {
        let files = match self.vm_service.list_files(vm_id).await {
            Ok(f) => f,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "listing workspace files for extract failed");
                return;
            }
        };

        let mut file_count = 0u64;
        let mut total_size = 0u64;
        for (rel_path, size) in files {
            if is_sensitive_path(&rel_path) {
                continue;
            }
            let bytes = match self.vm_service.download_file(vm_id, &rel_path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(session_id = %session.id, rel_path, error = %e, "reading file for extract failed");
                    continue;
                }
            };
            let label = format!("extract {rel_path} for session {}", session.id);
            let attempt = era_core::retry::retry(EXTRACT_RETRY_ATTEMPTS, std::time::Duration::from_millis(100), &label, || {
                self.objects.put(&session.id, &rel_path, Bytes::from(bytes.clone()))
            })
            .await;
            if attempt.is_err() {
                warn!(session_id = %session.id, rel_path, "extract upload exhausted retries, file left out of this run's persisted set");
                continue;
            }
            file_count += 1;
            total_size += size;
        }
        session.file_count = file_count;
        session.total_size_bytes = total_size;
    }
}

struct InternalRunOutcome {
    exit_code: i32,
    stdout: String,
    stderr: String,
    duration: std::time::Duration,
    data: Option<serde_json::Value>,
}
