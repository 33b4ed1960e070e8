//! Logging setup
//!
//! One `tracing` subscriber for the whole run. Wave and poll summaries go
//! out at info, scheduler command lines at debug.

use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Verbosity accepted from the config file, environment and CLI
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter directive scoped to this crate
    fn directive(self) -> String {
        format!("{}={}", env!("CARGO_CRATE_NAME"), self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level '{other}' (expected trace, debug, info, warn or error)"
            )),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// A second call is a no-op.
pub fn init_logger(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("info".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().unwrap_err().contains("loud"));
    }

    #[test]
    fn test_directive_is_crate_scoped() {
        assert_eq!(LogLevel::Debug.directive(), "batchtest=debug");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn test_init_twice() {
        init_logger(LogLevel::Error);
        init_logger(LogLevel::Debug);
    }
}
