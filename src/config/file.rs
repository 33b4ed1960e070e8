//! Configuration file discovery
//!
//! Finds the configuration file in the standard locations and layers
//! environment overrides on top of it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::env::EnvConfig;
use super::AppConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./batchtest.yaml",
    "./batchtest.yml",
    "./.batchtest/config.yaml",
    "~/.config/batchtest/config.yaml",
    "~/.batchtest.yaml",
];

/// Find configuration file in standard locations
pub fn find_config() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Resolve and load the effective configuration.
///
/// An explicit path (CLI flag, then `BATCHTEST_CONFIG`) must exist; otherwise
/// the standard locations are searched and built-in defaults used as a last
/// resort. Environment overrides are applied last.
pub fn load_config(explicit: Option<&Path>, env: &EnvConfig) -> Result<AppConfig> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(|p| expand_path(p)));

    let mut config = match explicit {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            AppConfig::load(&path)
                .with_context(|| format!("Invalid configuration: {}", path.display()))?
        }
        None => match find_config() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                AppConfig::load(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                AppConfig::default()
            }
        },
    };

    if env.has_any() {
        debug!("Applying BATCHTEST_* environment overrides");
        config.apply_env(env);
    }
    config.validate()?;
    Ok(config)
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("./test.yaml"), PathBuf::from("./test.yaml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.yaml"), home.join("x.yaml"));
        }
    }

    #[test]
    fn test_load_explicit_config_with_env_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site.yaml");
        AppConfig::example().save(&path).unwrap();

        let env = EnvConfig {
            max_jobs: Some(5),
            ..Default::default()
        };
        let config = load_config(Some(&path), &env).unwrap();
        assert_eq!(config.runner.max_jobs, Some(5));
        assert!(config.executors.slurm.contains_key("debug"));
    }

    #[test]
    fn test_load_missing_explicit_config_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        assert!(load_config(Some(&path), &EnvConfig::default()).is_err());
    }
}
