use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use era_core::record::VmRecord;

use crate::{Launcher, LauncherError, RunOptions, RunOutcome};

/// Scripted responses for one `run`/`shell` invocation.
#[derive(Debug, Clone)]
pub struct ScriptedResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Default for ScriptedResult {
    fn default() -> Self {
        ScriptedResult { exit_code: 0, stdout: String::new(), stderr: String::new() }
    }
}

/// In-memory launcher used by service-layer tests. Never spawns a real
/// process; `run`/`shell` return pre-scripted results keyed by VM id,
/// falling back to a zero-exit default.
#[derive(Default)]
pub struct MockLauncher {
    scripts: Mutex<HashMap<String, ScriptedResult>>,
    default_result: Mutex<Option<ScriptedResult>>,
    launched: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
    fail_launch: Mutex<Option<String>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, vm_id: &str, result: ScriptedResult) {
        self.scripts.lock().unwrap().insert(vm_id.to_string(), result);
    }

    /// Result returned for any VM id with no per-id script, overriding the
    /// zero-exit fallback. Useful when the VM id isn't known ahead of time.
    pub fn set_default_result(&self, result: ScriptedResult) {
        *self.default_result.lock().unwrap() = Some(result);
    }

    /// Make every subsequent `launch` fail with `Unavailable(reason)`.
    pub fn fail_every_launch(&self, reason: &str) {
        *self.fail_launch.lock().unwrap() = Some(reason.to_string());
    }

    pub fn launched_ids(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    pub fn stopped_ids(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn cleaned_ids(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, vm: &VmRecord) -> Result<(), LauncherError> {
        if let Some(reason) = self.fail_launch.lock().unwrap().clone() {
            return Err(LauncherError::Unavailable(reason));
        }
        self.launched.lock().unwrap().push(vm.id.clone());
        Ok(())
    }

    async fn stop(&self, vm_id: &str) -> Result<(), LauncherError> {
        self.stopped.lock().unwrap().push(vm_id.to_string());
        Ok(())
    }

    async fn cleanup(&self, vm_id: &str) -> Result<(), LauncherError> {
        self.cleaned.lock().unwrap().push(vm_id.to_string());
        Ok(())
    }

    async fn run(&self, vm: &VmRecord, _opts: RunOptions) -> Result<RunOutcome, LauncherError> {
        let result = self
            .scripts
            .lock()
            .unwrap()
            .get(&vm.id)
            .cloned()
            .or_else(|| self.default_result.lock().unwrap().clone())
            .unwrap_or_default();
        Ok(RunOutcome {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            duration: std::time::Duration::from_millis(1),
            timed_out: false,
        })
    }

    async fn shell(&self, vm: &VmRecord, _command: &str, _stdin: Option<Vec<u8>>) -> Result<RunOutcome, LauncherError> {
        let result = self.scripts.lock().unwrap().get(&vm.id).cloned().unwrap_or_default();
        Ok(RunOutcome {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            duration: std::time::Duration::from_millis(1),
            timed_out: false,
        })
    }

    async fn list(&self) -> Result<Vec<String>, LauncherError> {
        Ok(self.launched.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use era_core::language::Language;
    use era_core::record::{NetworkMode, VmStatus};

    fn sample_vm() -> VmRecord {
        VmRecord {
            id: "python-1".into(),
            language: Language::Python,
            status: VmStatus::Pending,
            cpu_count: 1,
            memory_mib: 256,
            network_mode: NetworkMode::None,
            persist: false,
            image_ref: "default".into(),
            workdir_path: "/tmp/python-1".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            last_run_at: None,
            allow_internet: false,
        }
    }

    #[tokio::test]
    async fn scripted_run_result_is_returned() {
        let launcher = MockLauncher::new();
        let vm = sample_vm();
        launcher.script("python-1", ScriptedResult { exit_code: 3, stdout: "hi".into(), stderr: String::new() });

        let outcome = launcher.run(&vm, RunOptions::default()).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout, "hi");
    }

    #[tokio::test]
    async fn launch_failure_is_scriptable() {
        let launcher = MockLauncher::new();
        launcher.fail_every_launch("no backend installed");
        let err = launcher.launch(&sample_vm()).await.unwrap_err();
        assert!(matches!(err, LauncherError::Unavailable(_)));
    }

    #[tokio::test]
    async fn lifecycle_calls_are_recorded() {
        let launcher = MockLauncher::new();
        let vm = sample_vm();
        launcher.launch(&vm).await.unwrap();
        launcher.stop(&vm.id).await.unwrap();
        launcher.cleanup(&vm.id).await.unwrap();

        assert_eq!(launcher.launched_ids(), vec!["python-1".to_string()]);
        assert_eq!(launcher.stopped_ids(), vec!["python-1".to_string()]);
        assert_eq!(launcher.cleaned_ids(), vec!["python-1".to_string()]);
    }
}
