use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSettings {
    pub launch_timeout_ms: u64,
    pub transition_timeout_ms: u64,
    pub main_thread_timeout_ms: u64,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            launch_timeout_ms: 45_000,
            transition_timeout_ms: 45_000,
            main_thread_timeout_ms: 10_000,
        }
    }
}

impl ScenarioSettings {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn main_thread_timeout(&self) -> Duration {
        Duration::from_millis(self.main_thread_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorSettings {
    pub connect_timeout_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageSettings {
    /// Root of the test storage areas. Empty means a directory under the system temp dir.
    pub root: String,
}

impl StorageSettings {
    pub fn resolved_root(&self) -> PathBuf {
        if self.root.trim().is_empty() {
            std::env::temp_dir().join("instrumentation_kit").join("storage")
        } else {
            PathBuf::from(&self.root)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellSettings {
    pub default_timeout_ms: u64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub scenario: ScenarioSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub shell: ShellSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("INSTRUMENTATION_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".instrumentation_kit.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config() -> Result<RunnerConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &RunnerConfig) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path))
}

pub fn load_config_from_path(path: &Path) -> Result<RunnerConfig, AppError> {
    if !path.exists() {
        return Ok(RunnerConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), ""))?;
    let mut config: RunnerConfig = serde_json::from_value(value.clone()).unwrap_or_default();
    config = apply_flat_overrides(config, &value);
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &RunnerConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

/// Accepts the runner argument spellings (`timeout_msec`, ...) at the top level of the file.
fn apply_flat_overrides(mut config: RunnerConfig, value: &serde_json::Value) -> RunnerConfig {
    if let Some(timeout) = value.get("timeout_msec").and_then(|v| v.as_u64()) {
        config.scenario.transition_timeout_ms = timeout;
        config.scenario.launch_timeout_ms = timeout;
    }
    if let Some(root) = value.get("storage_root").and_then(|v| v.as_str()) {
        config.storage.root = root.to_string();
    }
    if let Some(level) = value.get("log_level").and_then(|v| v.as_str()) {
        config.logging.level = level.to_lowercase();
    }
    config
}

pub fn validate_config(mut config: RunnerConfig) -> RunnerConfig {
    let defaults = RunnerConfig::default();
    if !(100..=600_000).contains(&config.scenario.launch_timeout_ms) {
        config.scenario.launch_timeout_ms = defaults.scenario.launch_timeout_ms;
    }
    if !(100..=600_000).contains(&config.scenario.transition_timeout_ms) {
        config.scenario.transition_timeout_ms = defaults.scenario.transition_timeout_ms;
    }
    if !(100..=600_000).contains(&config.scenario.main_thread_timeout_ms) {
        config.scenario.main_thread_timeout_ms = defaults.scenario.main_thread_timeout_ms;
    }
    if config.orchestrator.connect_timeout_ms == 0 {
        config.orchestrator.connect_timeout_ms = defaults.orchestrator.connect_timeout_ms;
    }
    if config.shell.default_timeout_ms == 0 {
        config.shell.default_timeout_ms = defaults.shell.default_timeout_ms;
    }
    if !matches!(
        config.logging.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        config.logging.level = defaults.logging.level;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_flat_values() {
        let value = serde_json::json!({
            "timeout_msec": 2500,
            "storage_root": "/tmp/storage",
            "log_level": "DEBUG",
            "shell": { "default_timeout_ms": 700 }
        });
        let mut config: RunnerConfig = serde_json::from_value(value.clone()).unwrap_or_default();
        config = apply_flat_overrides(config, &value);
        assert_eq!(config.scenario.transition_timeout_ms, 2500);
        assert_eq!(config.scenario.launch_timeout_ms, 2500);
        assert_eq!(config.storage.root, "/tmp/storage");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.shell.default_timeout_ms, 700);
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = RunnerConfig::default();
        config.scenario.launch_timeout_ms = 1;
        config.scenario.main_thread_timeout_ms = 10_000_000;
        config.orchestrator.connect_timeout_ms = 0;
        config.logging.level = "loud".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.scenario.launch_timeout_ms, 45_000);
        assert_eq!(validated.scenario.main_thread_timeout_ms, 10_000);
        assert_eq!(validated.orchestrator.connect_timeout_ms, 5_000);
        assert_eq!(validated.logging.level, "info");
    }

    #[test]
    fn save_keeps_backup_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = backup_config_path(&path);

        let mut first = RunnerConfig::default();
        first.scenario.transition_timeout_ms = 1_000;
        save_config_to_path(&first, &path, &backup).expect("save first");
        assert!(!backup.exists());

        let mut second = first.clone();
        second.logging.json = true;
        save_config_to_path(&second, &path, &backup).expect("save second");

        assert_eq!(load_config_from_path(&path).expect("load"), second);
        assert_eq!(load_config_from_path(&backup).expect("load backup"), first);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config, RunnerConfig::default());
    }
}
