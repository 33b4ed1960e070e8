//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "BATCHTEST";

/// Overrides read from `BATCHTEST_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// BATCHTEST_POOL_SIZE
    pub pool_size: Option<usize>,
    /// BATCHTEST_MAX_JOBS
    pub max_jobs: Option<usize>,
    /// BATCHTEST_POLL_INTERVAL (seconds)
    pub poll_interval: Option<u64>,
    /// BATCHTEST_MAX_PEND_TIME (seconds)
    pub max_pend_time: Option<u64>,
    /// BATCHTEST_TIMEOUT (seconds)
    pub timeout: Option<u64>,
    /// BATCHTEST_CONFIG
    pub config_file: Option<String>,
    /// BATCHTEST_LOG_LEVEL
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            pool_size: get_env_parse("POOL_SIZE"),
            max_jobs: get_env_parse("MAX_JOBS"),
            poll_interval: get_env_parse("POLL_INTERVAL"),
            max_pend_time: get_env_parse("MAX_PEND_TIME"),
            timeout: get_env_parse("TIMEOUT"),
            config_file: get_env("CONFIG"),
            log_level: get_env("LOG_LEVEL"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.pool_size.is_some()
            || self.max_jobs.is_some()
            || self.poll_interval.is_some()
            || self.max_pend_time.is_some()
            || self.timeout.is_some()
            || self.config_file.is_some()
            || self.log_level.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Print all BATCHTEST environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
    println!("  {ENV_PREFIX}_POOL_SIZE       Worker pool size");
    println!("  {ENV_PREFIX}_MAX_JOBS        Maximum builders dispatched per wave");
    println!("  {ENV_PREFIX}_POLL_INTERVAL   Seconds between batch job polls");
    println!("  {ENV_PREFIX}_MAX_PEND_TIME   Seconds a batch job may stay pending");
    println!("  {ENV_PREFIX}_TIMEOUT         Per-test timeout in seconds for local runs");
    println!("  {ENV_PREFIX}_LOG_LEVEL       trace, debug, info, warn or error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_load() {
        env::set_var("BATCHTEST_MAX_PEND_TIME", "45");
        env::set_var("BATCHTEST_POOL_SIZE", "not-a-number");

        let config = EnvConfig::load();
        assert_eq!(config.max_pend_time, Some(45));
        assert_eq!(config.pool_size, None);
        assert!(config.has_any());

        env::remove_var("BATCHTEST_MAX_PEND_TIME");
        env::remove_var("BATCHTEST_POOL_SIZE");
    }
}
