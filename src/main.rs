//! batchtest - HPC acceptance-test orchestrator
//!
//! Takes the test instances ("builders") produced by the build stage and
//! drives each one to a terminal state on its configured executor: a local
//! shell, a batch scheduler (Slurm, LSF, PBS, Torque) or a container runtime.
//!
//! ## Features
//!
//! - Dependency-aware dispatch in waves through a bounded worker pool
//! - Batch job polling with pend-timeout cancellation
//! - Bounded retry of failed local runs
//! - Table or JSON output, JSON export for the reporting stage
//!
//! ## Usage
//!
//! ```bash
//! # Run builders with the discovered configuration
//! batchtest run --builders builders.yaml
//!
//! # Tighter polling, export results
//! batchtest run -b builders.yaml --poll-interval 10 --output results.json
//!
//! # Inspect configuration
//! batchtest executors
//! batchtest config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod cli;
mod config;
mod executor;
mod models;
mod orchestrator;
mod output;
mod utils;

use cli::Args;
use config::{AppConfig, EnvConfig};
use executor::ExecutorRegistry;
use orchestrator::{Orchestrator, OrchestratorConfig, RunSummary};
use output::{OutputFormat, ResultFormatter};
use utils::{init_logger, LogLevel, ProcessRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    match args.command {
        cli::Command::Run(run_args) => {
            let mut config = config::load_config(run_args.config.as_deref(), &env)?;
            apply_run_args(&mut config, &run_args);
            config.validate()?;
            init_logging(&config, args.verbose);
            run_builders(run_args, config).await?;
        }
        cli::Command::Executors(executor_args) => {
            let config = config::load_config(executor_args.config.as_deref(), &env)?;
            init_logging(&config, args.verbose);
            list_executors(&config, executor_args.setup).await?;
        }
        cli::Command::Config(config_args) => {
            init_logger(if args.verbose {
                LogLevel::Debug
            } else {
                LogLevel::Info
            });
            manage_config(config_args, &env)?;
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig, verbose: bool) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.runner.log_level.parse().unwrap_or(LogLevel::Info)
    };
    init_logger(level);
}

/// Command-line flags beat environment and file settings
fn apply_run_args(config: &mut AppConfig, args: &cli::RunArgs) {
    let runner = &mut config.runner;
    if let Some(n) = args.pool_size {
        runner.pool_size = n;
    }
    if let Some(n) = args.max_jobs {
        runner.max_jobs = Some(n);
    }
    if let Some(secs) = args.poll_interval {
        runner.poll_interval_secs = secs;
    }
    if let Some(secs) = args.max_pend_time {
        runner.max_pend_time_secs = secs;
    }
    if let Some(secs) = args.timeout {
        runner.timeout_secs = Some(secs);
    }
}

async fn run_builders(args: cli::RunArgs, config: AppConfig) -> Result<()> {
    let builders = models::load_builders(&args.builders)?;
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let formatter = ResultFormatter::new(format);

    let registry = Arc::new(ExecutorRegistry::from_config(
        &config,
        Arc::new(ProcessRunner),
    ));
    let root = config.runner.executor_root();
    registry
        .setup(&root)
        .await
        .with_context(|| format!("Failed to set up executors under {}", root.display()))?;

    for builder in &builders {
        if registry.get(&builder.executor).is_none() {
            warn!(
                "{}: executor '{}' is not configured (available: {})",
                builder,
                builder.executor,
                registry.names().join(", ")
            );
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        "Loaded {} builders from {}",
        builders.len(),
        args.builders.display()
    );
    let mut orchestrator = Orchestrator::new(
        registry,
        OrchestratorConfig::from(&config.runner),
        builders,
    );
    let started = Instant::now();
    let result = orchestrator.run(shutdown_rx).await;
    let summary = match &result {
        Ok(summary) => summary.clone(),
        Err(_) => RunSummary::new(
            orchestrator.builders(),
            orchestrator.waves(),
            started.elapsed(),
        ),
    };
    let builders = orchestrator.into_builders();

    if let Some(path) = &args.output {
        output::write_builders_to_file(path, &builders)?;
        info!("Results written to {}", path.display());
    }

    println!("{}", formatter.format_builders(&builders));
    println!("{}", formatter.format_summary(&summary));
    result.map(|_| ()).map_err(|e| {
        error!("{}", e);
        e.into()
    })
}

async fn list_executors(config: &AppConfig, setup: bool) -> Result<()> {
    let registry = ExecutorRegistry::from_config(config, Arc::new(ProcessRunner));

    if registry.is_empty() {
        println!("No executors configured");
        return Ok(());
    }

    println!("\nConfigured executors ({} total)\n", registry.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for executor in registry.iter() {
        let pend = executor
            .max_pend_time()
            .map(|d| format!("max pend {}s", d.as_secs()))
            .unwrap_or_default();
        println!(
            "  {:24} {:10} {:14} {}",
            executor.name(),
            executor.kind().type_name(),
            pend,
            executor.kind().description().unwrap_or_default()
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    if setup {
        let root = config.runner.executor_root();
        registry.setup(&root).await?;
        println!("✓ Executor hooks written to {}", root.display());
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            AppConfig::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to describe your executors.");
        }

        cli::ConfigAction::Show {
            config,
            env: show_env,
            format,
        } => {
            if show_env {
                config::print_env_help();
            } else {
                let config = config::load_config(config.as_deref(), env)?;
                let rendered = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{rendered}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let Some(path) = file.or_else(config::find_config) else {
                anyhow::bail!("No configuration file found");
            };

            match AppConfig::load(&path) {
                Ok(config) => {
                    println!(
                        "✓ Configuration file is valid: {} ({} executors)",
                        path.display(),
                        config.executors.len()
                    );
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_cli_flags_override_config() {
        let mut config = AppConfig::default();
        config.runner.max_pend_time_secs = 300;
        let args = cli::RunArgs {
            builders: Path::new("b.yaml").to_path_buf(),
            config: None,
            pool_size: Some(2),
            max_jobs: None,
            poll_interval: Some(5),
            max_pend_time: None,
            timeout: Some(120),
            format: "table".to_string(),
            output: None,
        };

        apply_run_args(&mut config, &args);
        assert_eq!(config.runner.pool_size, 2);
        assert_eq!(config.runner.poll_interval_secs, 5);
        assert_eq!(config.runner.max_pend_time_secs, 300);
        assert_eq!(config.runner.timeout_secs, Some(120));
    }
}
