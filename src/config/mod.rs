//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;
mod executors;
mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use env::{print_env_help, EnvConfig};
pub use executors::{BatchSettings, ContainerSettings, ExecutorsConfig, LocalSettings};
pub use file::{find_config, load_config};

use crate::utils::LogLevel;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Orchestrator settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Configured back-ends
    #[serde(default)]
    pub executors: ExecutorsConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            runner: RunnerConfig::default(),
            executors: ExecutorsConfig::local_only(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        if self.runner.pool_size == 0 {
            anyhow::bail!("runner.pool_size must be at least 1");
        }

        if self.runner.poll_interval_secs == 0 {
            anyhow::bail!("runner.poll_interval_secs must be at least 1");
        }

        if self.runner.max_jobs == Some(0) {
            anyhow::bail!("runner.max_jobs must be at least 1 when set");
        }

        if let Err(e) = self.runner.log_level.parse::<LogLevel>() {
            anyhow::bail!("runner.log_level: {e}");
        }

        if self.executors.is_empty() {
            anyhow::bail!("No executors configured");
        }

        for (name, settings) in &self.executors.container {
            if settings.image.trim().is_empty() {
                anyhow::bail!("Container executor 'container.{name}' has no image");
            }
        }

        Ok(())
    }

    /// Apply environment overrides (environment beats file)
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(n) = env.pool_size {
            self.runner.pool_size = n;
        }
        if let Some(n) = env.max_jobs {
            self.runner.max_jobs = Some(n);
        }
        if let Some(secs) = env.poll_interval {
            self.runner.poll_interval_secs = secs;
        }
        if let Some(secs) = env.max_pend_time {
            self.runner.max_pend_time_secs = secs;
        }
        if let Some(secs) = env.timeout {
            self.runner.timeout_secs = Some(secs);
        }
        if let Some(level) = &env.log_level {
            self.runner.log_level = level.clone();
        }
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut executors = ExecutorsConfig::local_only();
        executors.defaults.max_pend_time = Some(90);
        executors.slurm.insert(
            "debug".to_string(),
            BatchSettings {
                description: Some("Slurm debug partition".to_string()),
                queue: Some("debug".to_string()),
                ..Default::default()
            },
        );
        executors.lsf.insert(
            "batch".to_string(),
            BatchSettings {
                queue: Some("batch".to_string()),
                ..Default::default()
            },
        );
        executors
            .container
            .insert("ubuntu".to_string(), ContainerSettings::new("ubuntu:22.04"));

        Self {
            version: default_version(),
            runner: RunnerConfig::default(),
            executors,
        }
    }
}

/// Orchestrator settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker pool size, capped by host parallelism
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Maximum builders dispatched per wave
    #[serde(default)]
    pub max_jobs: Option<usize>,

    /// Seconds between batch job polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds a batch job may stay pending before it is cancelled
    #[serde(default = "default_max_pend_time")]
    pub max_pend_time_secs: u64,

    /// Per-test wall-clock limit for local runs
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Where executor hook scripts are written
    #[serde(default)]
    pub executor_root: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_jobs: None,
            poll_interval_secs: default_poll_interval(),
            max_pend_time_secs: default_max_pend_time(),
            timeout_secs: None,
            executor_root: None,
            log_level: default_log_level(),
        }
    }
}

impl RunnerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_pend_time(&self) -> Duration {
        Duration::from_secs(self.max_pend_time_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Hook directory, `<data dir>/batchtest/executors` unless configured
    pub fn executor_root(&self) -> PathBuf {
        match &self.executor_root {
            Some(root) => root.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("batchtest")
                .join("executors"),
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_pend_time() -> u64 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.runner.poll_interval_secs, 30);
        assert_eq!(config.runner.max_pend_time_secs, 90);
        assert!(config.runner.pool_size >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = AppConfig::example();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.executors.len(), config.executors.len());
        assert_eq!(loaded.executors.slurm["debug"].queue.as_deref(), Some("debug"));
    }

    #[test]
    fn test_config_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        AppConfig::example().save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.executors.defaults.max_pend_time, Some(90));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.runner.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.runner.max_jobs = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config
            .executors
            .container
            .insert("bad".to_string(), ContainerSettings::new(""));
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.executors = ExecutorsConfig::default();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.runner.log_level = "chatty".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn test_apply_env() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            pool_size: Some(3),
            max_pend_time: Some(10),
            timeout: Some(600),
            ..Default::default()
        };
        config.apply_env(&env);
        assert_eq!(config.runner.pool_size, 3);
        assert_eq!(config.runner.max_pend_time(), Duration::from_secs(10));
        assert_eq!(config.runner.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.runner.poll_interval_secs, 30);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = "executors:\n  local:\n    bash: {}\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.runner.max_pend_time_secs, 90);
        assert!(config.executors.local.contains_key("bash"));
        assert!(config.validate().is_ok());
    }
}
