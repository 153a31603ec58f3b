//! Configuration loading (TOML file with CLI-flag overrides).
//!
//! Priority, highest to lowest: CLI flags, `<project>/apiary.toml`, defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Queen-related settings that can be overridden per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct QueenSettings {
    pub max_concurrent_workers: usize,
    pub worker_timeout_ms: i64,
    pub main_loop_interval_ms: u64,
    pub test_framework: String,
    pub test_directory: String,
}

impl Default for QueenSettings {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 4,
            worker_timeout_ms: 5 * 60 * 1000,
            main_loop_interval_ms: 200,
            test_framework: "cargo test".to_string(),
            test_directory: "tests".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub queen: QueenSettings,
}

impl AppConfig {
    /// Loads `<project_path>/apiary.toml` if present, otherwise defaults.
    pub(crate) fn load(project_path: &Path) -> anyhow::Result<Self> {
        let path = project_path.join("apiary.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.queen.max_concurrent_workers, 4);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("apiary.toml"), "[queen]\nmax_concurrent_workers = 8\n").unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.queen.max_concurrent_workers, 8);
        assert_eq!(config.queen.test_framework, "cargo test");
    }
}
