//! Orchestrator settings, loadable from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Parent of every per-run working directory.
    pub runs_root: PathBuf,
    pub bundles_root: PathBuf,
    /// Name the engine reads its control file from.
    pub control_file: String,
    /// Output patterns captured into each bundle, relative to the working directory.
    pub outputs: Vec<String>,
    /// Wall-clock limit for one execution; none means unbounded.
    pub timeout_ms: Option<u64>,
    /// Time between terminate and kill.
    pub grace_period_ms: u64,
    pub poll_interval_ms: u64,
    /// Stage documents even when validation reports errors.
    pub allow_invalid: bool,
    /// Remove the working directory after a successful capture.
    pub cleanup_on_success: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runs_root: PathBuf::from("runs"),
            bundles_root: PathBuf::from("bundles"),
            control_file: "w2_con.npt".to_string(),
            outputs: Vec::new(),
            timeout_ms: None,
            grace_period_ms: 5_000,
            poll_interval_ms: 100,
            allow_invalid: false,
            cleanup_on_success: false,
        }
    }
}

impl OrchestratorConfig {
    /// Settings rooted at `root`: `root/runs` and `root/bundles`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            runs_root: root.join("runs"),
            bundles_root: root.join("bundles"),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn load_yaml(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AppError::SettingsFileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| AppError::SettingsParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save_yaml(&self, path: &Path) -> AppResult<()> {
        let content = serde_yaml::to_string(self).map_err(|e| AppError::SettingsParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| AppError::SettingsFileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
