//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::task::CheckTarget;

fn default_cargo_path() -> String {
    "cargo".to_string()
}

/// Configuration for launching cargo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Executable to launch.
    #[serde(default = "default_cargo_path")]
    pub cargo_path: String,
    /// Exported to the child as `CARGO_HOME` when set.
    #[serde(default)]
    pub cargo_home: Option<PathBuf>,
    /// Extra environment variables. These override the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// What `check` covers.
    #[serde(default)]
    pub check_target: CheckTarget,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cargo_path: default_cargo_path(),
            cargo_home: None,
            env: HashMap::new(),
            check_target: CheckTarget::default(),
        }
    }
}

impl RunnerConfig {
    /// Environment overrides for the child process.
    #[must_use]
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        if let Some(home) = &self.cargo_home {
            env.insert("CARGO_HOME".to_string(), home.display().to_string());
        }
        env
    }
}
