use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use era_core::record::VmRecord;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::{Launcher, LauncherError, RunOptions, RunOutcome, TIMEOUT_SENTINEL_EXIT_CODE};

/// Launcher backend that runs guest commands as a plain host process
/// chrooted into the VM's workdir via `/workspace`. Good enough for local
/// development and tests; a microVM-backed launcher implements the same
/// trait against Firecracker, libkrun, or a container runtime.
pub struct ProcessLauncher {
    /// Shell used to interpret `RunOptions.command`.
    shell: String,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        ProcessLauncher { shell: "/bin/sh".to_string() }
    }

    fn workdir(vm: &VmRecord) -> PathBuf {
        PathBuf::from(&vm.workdir_path)
    }

    async fn exec(&self, vm: &VmRecord, command: &str, timeout: std::time::Duration, env: &std::collections::HashMap<String, String>, stdin: Option<Vec<u8>>) -> Result<RunOutcome, LauncherError> {
        let workdir = Self::workdir(vm);
        tokio::fs::create_dir_all(&workdir).await?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&workdir)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| LauncherError::Unavailable(e.to_string()))?;

        if let Some(bytes) = stdin {
            if let Some(mut sin) = child.stdin.take() {
                let _ = sin.write_all(&bytes).await;
            }
        }
        drop(child.stdin.take());

        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, child.wait_with_output()).await;

        match outcome {
            Ok(Ok(output)) => Ok(RunOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration: start.elapsed(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(LauncherError::Crash(e.to_string())),
            Err(_) => {
                warn!(vm_id = %vm.id, timeout_secs = timeout.as_secs(), "run timed out, sentinel exit code returned");
                Ok(RunOutcome {
                    exit_code: TIMEOUT_SENTINEL_EXIT_CODE,
                    stdout: String::new(),
                    stderr: "command timed out".to_string(),
                    duration: timeout,
                    timed_out: true,
                })
            }
        }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    #[instrument(skip_all, fields(vm_id = %vm.id))]
    async fn launch(&self, vm: &VmRecord) -> Result<(), LauncherError> {
        tokio::fs::create_dir_all(&vm.workdir_path).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(vm_id = %vm_id))]
    async fn stop(&self, vm_id: &str) -> Result<(), LauncherError> {
        let _ = vm_id;
        Ok(())
    }

    #[instrument(skip_all, fields(vm_id = %vm_id))]
    async fn cleanup(&self, vm_id: &str) -> Result<(), LauncherError> {
        let _ = vm_id;
        Ok(())
    }

    #[instrument(skip_all, fields(vm_id = %vm.id))]
    async fn run(&self, vm: &VmRecord, opts: RunOptions) -> Result<RunOutcome, LauncherError> {
        if let Some(staged) = &opts.staged_file {
            let in_dir = Self::workdir(vm).join("in");
            tokio::fs::create_dir_all(&in_dir).await?;
            if let Some(basename) = staged.file_name() {
                tokio::fs::copy(staged, in_dir.join(basename)).await?;
            }
        }
        self.exec(vm, &opts.command, opts.timeout, &opts.env, None).await
    }

    async fn shell(&self, vm: &VmRecord, command: &str, stdin: Option<Vec<u8>>) -> Result<RunOutcome, LauncherError> {
        self.exec(vm, command, std::time::Duration::from_secs(300), &Default::default(), stdin).await
    }

    async fn list(&self) -> Result<Vec<String>, LauncherError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use era_core::language::Language;
    use era_core::record::{NetworkMode, VmStatus};

    fn sample_vm(workdir: &std::path::Path) -> VmRecord {
        VmRecord {
            id: "python-1".into(),
            language: Language::Python,
            status: VmStatus::Pending,
            cpu_count: 1,
            memory_mib: 256,
            network_mode: NetworkMode::None,
            persist: false,
            image_ref: "default".into(),
            workdir_path: workdir.to_string_lossy().to_string(),
            created_at: "2026-01-01T00:00:00Z".into(),
            last_run_at: None,
            allow_internet: false,
        }
    }

    #[tokio::test]
    async fn run_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new();
        let vm = sample_vm(dir.path());
        launcher.launch(&vm).await.unwrap();

        let opts = RunOptions {
            command: "echo hello".to_string(),
            timeout: std::time::Duration::from_secs(5),
            env: Default::default(),
            staged_file: None,
        };
        let outcome = launcher.run(&vm, opts).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new();
        let vm = sample_vm(dir.path());

        let opts = RunOptions {
            command: "exit 7".to_string(),
            timeout: std::time::Duration::from_secs(5),
            env: Default::default(),
            staged_file: None,
        };
        let outcome = launcher.run(&vm, opts).await.unwrap();
        assert_eq!(outcome.exit_code, 7);
    }

    #[tokio::test]
    async fn run_times_out_with_sentinel_code() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new();
        let vm = sample_vm(dir.path());

        let opts = RunOptions {
            command: "sleep 5".to_string(),
            timeout: std::time::Duration::from_millis(50),
            env: Default::default(),
            staged_file: None,
        };
        let outcome = launcher.run(&vm, opts).await.unwrap();
        assert_eq!(outcome.exit_code, TIMEOUT_SENTINEL_EXIT_CODE);
        assert!(outcome.timed_out);
    }

    #[tokio::test]
    async fn run_sees_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new();
        let vm = sample_vm(dir.path());

        let mut env = std::collections::HashMap::new();
        env.insert("ERA_SESSION_ID".to_string(), "s1".to_string());
        let opts = RunOptions {
            command: "echo $ERA_SESSION_ID".to_string(),
            timeout: std::time::Duration::from_secs(5),
            env,
            staged_file: None,
        };
        let outcome = launcher.run(&vm, opts).await.unwrap();
        assert_eq!(outcome.stdout.trim(), "s1");
    }

    #[tokio::test]
    async fn list_is_empty_for_local_process_backend() {
        let launcher = ProcessLauncher::new();
        assert!(launcher.list().await.unwrap().is_empty());
    }
}
