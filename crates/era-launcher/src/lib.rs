pub mod mock;
pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use era_core::record::VmRecord;

/// Failure taxonomy a launcher backend maps its errors onto. Any variant
/// other than these maps to a generic internal error by the caller.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("launcher backend unavailable: {0}")]
    Unavailable(String),
    #[error("run timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("guest process exited {0}")]
    ExitNonZero(i32),
    #[error("guest process crashed: {0}")]
    Crash(String),
    #[error("io error: {0}")]
    IoError(String),
    #[error("internal launcher error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for LauncherError {
    fn from(e: std::io::Error) -> Self {
        LauncherError::IoError(e.to_string())
    }
}

/// Maps launcher failures onto the service-level error taxonomy at the
/// `VmService` boundary, per the propagation policy: transient/backend
/// conditions keep their variant so callers can tell a timeout from a
/// genuine bug, everything else collapses to `Internal`.
impl From<LauncherError> for era_core::error::Error {
    fn from(e: LauncherError) -> Self {
        let detail = e.to_string();
        match e {
            LauncherError::Unavailable(s) => era_core::error::Error::Unavailable(s),
            LauncherError::Timeout(d) => era_core::error::Error::Timeout(d),
            LauncherError::IoError(s) => era_core::error::Error::IoError(s),
            LauncherError::ExitNonZero(_) | LauncherError::Crash(_) | LauncherError::Internal(_) => {
                era_core::error::Error::Internal(detail)
            }
        }
    }
}

/// Inputs to one guest command execution.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub command: String,
    pub timeout: std::time::Duration,
    pub env: HashMap<String, String>,
    /// Host path staged read-only at `/in/<basename>` inside the guest.
    pub staged_file: Option<PathBuf>,
}

/// Result of one guest command execution.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: std::time::Duration,
    pub timed_out: bool,
}

/// Exit code returned for a run the launcher had to kill on timeout.
pub const TIMEOUT_SENTINEL_EXIT_CODE: i32 = 124;

/// A replaceable sandbox backend. `VMService` talks to a VM only through
/// this trait; a Firecracker, libkrun, or container-based implementation
/// is a drop-in replacement for [`process::ProcessLauncher`].
///
/// The launcher owns no records — it receives a `VmRecord` by value and
/// returns results; all persistence is the caller's job.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Bring a VM from `pending` to `running`. Idempotent when already running.
    async fn launch(&self, vm: &VmRecord) -> Result<(), LauncherError>;

    /// Idempotent; tolerant of a VM the backend has never heard of.
    async fn stop(&self, vm_id: &str) -> Result<(), LauncherError>;

    /// Remove backend-side VM artifacts. Tolerant of a missing VM.
    async fn cleanup(&self, vm_id: &str) -> Result<(), LauncherError>;

    /// Execute one command inside the VM and collect its result.
    async fn run(&self, vm: &VmRecord, opts: RunOptions) -> Result<RunOutcome, LauncherError>;

    /// Interactive/streaming variant of `run`: feeds `stdin` to the guest
    /// command and returns once it exits. Backends with a real TTY would
    /// stream output incrementally instead of buffering it.
    async fn shell(&self, vm: &VmRecord, command: &str, stdin: Option<Vec<u8>>) -> Result<RunOutcome, LauncherError>;

    /// Host-known live VM ids, used by `VMService` reconciliation at startup.
    async fn list(&self) -> Result<Vec<String>, LauncherError>;
}
