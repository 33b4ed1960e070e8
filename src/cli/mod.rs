//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HPC acceptance-test orchestrator
#[derive(Parser, Debug)]
#[command(name = "batchtest")]
#[command(version = "0.1.0")]
#[command(about = "Run generated test scripts on local shells, batch schedulers and containers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run builders to completion
    Run(RunArgs),

    /// List configured executors
    Executors(ExecutorsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Builder file (YAML or JSON list) produced by the build stage
    #[arg(short, long)]
    pub builders: PathBuf,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Worker pool size
    #[arg(short, long)]
    pub pool_size: Option<usize>,

    /// Maximum builders dispatched per wave
    #[arg(long)]
    pub max_jobs: Option<usize>,

    /// Seconds between batch job polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Seconds a batch job may stay pending before it is cancelled
    #[arg(long)]
    pub max_pend_time: Option<u64>,

    /// Per-test wall-clock limit for local runs, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Write the final builder set to this file as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for executors command
#[derive(Parser, Debug)]
pub struct ExecutorsArgs {
    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write executor hook scripts to the executor root
    #[arg(long)]
    pub setup: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "batchtest.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// List supported environment variables instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate, discovered when omitted
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "batchtest",
            "run",
            "--builders",
            "builders.yaml",
            "--pool-size",
            "8",
            "--max-pend-time",
            "120",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.builders, PathBuf::from("builders.yaml"));
                assert_eq!(run.pool_size, Some(8));
                assert_eq!(run.max_pend_time, Some(120));
                assert_eq!(run.format, "table");
                assert!(run.output.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_builders() {
        assert!(Args::try_parse_from(["batchtest", "run"]).is_err());
    }

    #[test]
    fn test_config_init_args() {
        let args = Args::parse_from(["batchtest", "config", "init", "--force"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { output, force },
            }) => {
                assert_eq!(output, PathBuf::from("batchtest.yaml"));
                assert!(force);
            }
            _ => panic!("Expected config init"),
        }
    }
}
