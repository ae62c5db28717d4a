use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Global config threaded through every component constructor explicitly;
/// no implicit singletons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EraConfig {
    /// Root directory for the catalog store and VM workdirs.
    pub data_dir: PathBuf,
    /// Root directory the object store backend persists session files under.
    pub object_store_root: PathBuf,
    /// Default vCPU count for ephemeral session VMs.
    pub default_cpu_count: u32,
    /// Default memory footprint (MiB) for ephemeral session VMs.
    pub default_memory_mib: u32,
    /// Memory footprint (MiB) for setup VMs; larger than a run VM since
    /// package managers are memory-hungry.
    pub setup_memory_mib: u32,
    /// Fallback run timeout in seconds when neither the request nor the
    /// session specify one.
    pub default_timeout_secs: u32,
    /// Per-command timeout floor for setup groups; generous, since
    /// installing dependencies can be slow.
    pub setup_command_timeout_secs: u32,
    /// Bounded concurrency for the setup orchestrator.
    pub setup_concurrency: usize,
    /// Launcher backend selector.
    pub launcher_kind: String,
    /// Upload retry attempts during extract.
    pub extract_retry_attempts: u32,
    /// Production-mode flag; gates stricter sandboxing defaults.
    pub production: bool,
}

impl Default for EraConfig {
    fn default() -> Self {
        EraConfig {
            data_dir: PathBuf::from("/var/lib/era"),
            object_store_root: PathBuf::from("/var/lib/era/objects"),
            default_cpu_count: 1,
            default_memory_mib: 256,
            setup_memory_mib: 512,
            default_timeout_secs: 30,
            setup_command_timeout_secs: 300,
            setup_concurrency: 4,
            launcher_kind: "process".to_string(),
            extract_retry_attempts: 3,
            production: false,
        }
    }
}

impl EraConfig {
    /// Load from an optional TOML file, then apply env var overrides.
    /// Env vars always win over the file.
    pub fn load(toml_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match toml_path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            _ => EraConfig::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ERA_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ERA_OBJECT_STORE_ROOT") {
            self.object_store_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ERA_DEFAULT_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.default_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("ERA_SETUP_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.setup_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("ERA_LAUNCHER") {
            self.launcher_kind = v;
        }
        if let Ok(v) = std::env::var("ERA_PRODUCTION") {
            self.production = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    pub fn vm_workdir(&self, vm_id: &str) -> PathBuf {
        self.data_dir.join("vms").join(vm_id)
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EraConfig::default();
        assert_eq!(cfg.default_timeout_secs, 30);
        assert!(cfg.default_cpu_count >= 1);
        assert!(cfg.default_memory_mib >= 64);
        assert!(!cfg.is_production());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("era.toml");
        std::fs::write(&path, "default_timeout_secs = 90\nsetup_concurrency = 2\n").unwrap();
        let cfg = EraConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.default_timeout_secs, 90);
        assert_eq!(cfg.setup_concurrency, 2);
    }

    #[test]
    fn missing_toml_file_falls_back_to_defaults() {
        let cfg = EraConfig::load(Some(Path::new("/nonexistent/era.toml"))).unwrap();
        assert_eq!(cfg.default_timeout_secs, 30);
    }

    #[test]
    fn derived_paths_are_scoped_under_data_dir() {
        let mut cfg = EraConfig::default();
        cfg.data_dir = PathBuf::from("/tmp/era-test");
        assert_eq!(cfg.vm_workdir("python-1"), PathBuf::from("/tmp/era-test/vms/python-1"));
        assert_eq!(cfg.catalog_dir(), PathBuf::from("/tmp/era-test/catalog"));
    }
}
