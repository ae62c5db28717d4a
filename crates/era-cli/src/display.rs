use era_core::record::{SessionRecord, VmRecord};
use serde::Serialize;

use crate::output::TableRow;

/// Display row for `era vm list`.
#[derive(Debug, Serialize)]
pub struct VmRow {
    pub id: String,
    pub language: String,
    pub status: String,
    pub cpu_count: u32,
    pub memory_mib: u32,
    pub network_mode: String,
}

impl From<&VmRecord> for VmRow {
    fn from(vm: &VmRecord) -> Self {
        VmRow {
            id: vm.id.clone(),
            language: vm.language.to_string(),
            status: vm.status.to_string(),
            cpu_count: vm.cpu_count,
            memory_mib: vm.memory_mib,
            network_mode: vm.network_mode.to_string(),
        }
    }
}

impl TableRow for VmRow {
    fn header() -> Vec<&'static str> {
        vec!["ID", "LANGUAGE", "STATUS", "CPUS", "MEM (MiB)", "NETWORK"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.language.clone(),
            self.status.clone(),
            self.cpu_count.to_string(),
            self.memory_mib.to_string(),
            self.network_mode.clone(),
        ]
    }
}

/// Display row for `era session list`.
#[derive(Debug, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub language: String,
    pub persistent: bool,
    pub setup_status: String,
    pub file_count: u64,
    pub last_run_at: String,
}

impl From<&SessionRecord> for SessionRow {
    fn from(s: &SessionRecord) -> Self {
        SessionRow {
            id: s.id.clone(),
            language: s.language.to_string(),
            persistent: s.persistent,
            setup_status: s.setup_status.to_string(),
            file_count: s.file_count,
            last_run_at: s.last_run_at.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl TableRow for SessionRow {
    fn header() -> Vec<&'static str> {
        vec!["ID", "LANGUAGE", "PERSISTENT", "SETUP", "FILES", "LAST RUN"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.language.clone(),
            self.persistent.to_string(),
            self.setup_status.clone(),
            self.file_count.to_string(),
            self.last_run_at.clone(),
        ]
    }
}
