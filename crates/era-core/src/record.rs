use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// MicroVM lifecycle status.
///
/// Monotonic except `Running <-> Stopped`; `Cleaned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Pending,
    Running,
    Stopped,
    Errored,
    Cleaned,
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VmStatus::Pending => "pending",
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Errored => "errored",
            VmStatus::Cleaned => "cleaned",
        };
        write!(f, "{s}")
    }
}

/// Validate a VM status transition.
///
/// Any status may move to `Cleaned`. `Running <-> Stopped` is the only
/// two-way edge; everything else moves forward once.
pub fn validate_vm_transition(from: VmStatus, to: VmStatus) -> Result<(), String> {
    if to == VmStatus::Cleaned {
        return Ok(());
    }
    let valid = matches!(
        (from, to),
        (VmStatus::Pending, VmStatus::Running)
            | (VmStatus::Pending, VmStatus::Errored)
            | (VmStatus::Running, VmStatus::Stopped)
            | (VmStatus::Stopped, VmStatus::Running)
            | (VmStatus::Running, VmStatus::Errored)
            | (VmStatus::Stopped, VmStatus::Errored)
    );
    if valid {
        Ok(())
    } else {
        Err(format!("invalid VM transition: {from} -> {to}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    None,
    Host,
    Full,
}

impl NetworkMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(NetworkMode::None),
            "host" => Some(NetworkMode::Host),
            "full" => Some(NetworkMode::Full),
            _ => None,
        }
    }

    /// Whether this mode implies outbound internet access. `VmRecord.allow_internet`
    /// is derived from this at create time.
    pub fn allows_internet(&self) -> bool {
        !matches!(self, NetworkMode::None)
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkMode::None => "none",
            NetworkMode::Host => "host",
            NetworkMode::Full => "full",
        };
        write!(f, "{s}")
    }
}

/// Persisted record for a live or recently-live microVM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub language: Language,
    pub status: VmStatus,
    pub cpu_count: u32,
    pub memory_mib: u32,
    pub network_mode: NetworkMode,
    pub persist: bool,
    pub image_ref: String,
    pub workdir_path: String,
    pub created_at: String,
    pub last_run_at: Option<String>,
    pub allow_internet: bool,
}

/// Async setup state machine for a session's dependency install phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStatus {
    None,
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for SetupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetupStatus::None => "none",
            SetupStatus::Pending => "pending",
            SetupStatus::Running => "running",
            SetupStatus::Completed => "completed",
            SetupStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Validate a setup status transition: `none -> pending -> running ->
/// {completed, failed}`, each terminal state reachable only once.
pub fn validate_setup_transition(from: SetupStatus, to: SetupStatus) -> Result<(), String> {
    let valid = matches!(
        (from, to),
        (SetupStatus::None, SetupStatus::Pending)
            | (SetupStatus::Pending, SetupStatus::Running)
            | (SetupStatus::Running, SetupStatus::Completed)
            | (SetupStatus::Running, SetupStatus::Failed)
    );
    if valid {
        Ok(())
    } else {
        Err(format!("invalid setup transition: {from} -> {to}"))
    }
}

/// Declarative description of packages/commands to install once at
/// session creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupSpec {
    #[serde(default)]
    pub pip: Vec<String>,
    #[serde(default)]
    pub npm: Vec<String>,
    #[serde(default)]
    pub go: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl SetupSpec {
    pub fn is_empty(&self) -> bool {
        self.pip.is_empty() && self.npm.is_empty() && self.go.is_empty() && self.commands.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupInstalled {
    #[serde(default)]
    pub pip: Vec<String>,
    #[serde(default)]
    pub npm: Vec<String>,
    #[serde(default)]
    pub go: Vec<String>,
}

/// Outcome of the most recent setup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupResult {
    pub duration_ms: u64,
    pub installed: SetupInstalled,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCode {
    pub code: String,
    pub description: Option<String>,
    pub updated_at: String,
}

/// Persisted record for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub language: Language,
    pub persistent: bool,
    pub allow_internet: bool,
    pub allow_public: bool,
    pub default_timeout: Option<u32>,
    #[serde(default = "serde_json::Value::default")]
    pub metadata: serde_json::Value,
    #[serde(default = "serde_json::Value::default")]
    pub data: serde_json::Value,
    pub stored_code: Option<StoredCode>,
    pub created_at: String,
    pub last_run_at: Option<String>,
    pub setup: Option<SetupSpec>,
    pub setup_status: SetupStatus,
    pub setup_result: Option<SetupResult>,
    pub file_count: u64,
    pub total_size_bytes: u64,
}

/// Maximum combined serialized size of `metadata` + `data`.
pub const METADATA_DATA_MAX_BYTES: usize = 128 * 1024;

impl SessionRecord {
    /// Validate the `metadata`+`data` combined size invariant.
    pub fn validate_payload_size(&self) -> Result<(), String> {
        let meta_len = serde_json::to_vec(&self.metadata).map(|v| v.len()).unwrap_or(0);
        let data_len = serde_json::to_vec(&self.data).map(|v| v.len()).unwrap_or(0);
        if meta_len + data_len > METADATA_DATA_MAX_BYTES {
            Err(format!(
                "metadata+data is {} bytes, exceeds {} byte limit",
                meta_len + data_len,
                METADATA_DATA_MAX_BYTES
            ))
        } else {
            Ok(())
        }
    }
}
