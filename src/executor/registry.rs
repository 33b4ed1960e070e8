//! Executor registry
//!
//! Built once from configuration and shared read-only (behind an `Arc`)
//! with every worker and the poller.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Executor, ExecutorKind};
use crate::config::{AppConfig, BatchSettings};
use crate::utils::CommandRunner;

/// Immutable map of executor name to executor
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Executor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured executor, named `<type>.<name>`
    pub fn from_config(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let executors = &config.executors;
        let defaults = &executors.defaults;
        let runner_timeout = config.runner.timeout();
        let mut registry = Self::new();

        for (name, settings) in &executors.local {
            let timeout = settings
                .timeout_secs
                .map(Duration::from_secs)
                .or(runner_timeout);
            registry = registry.with_executor(
                Executor::new(
                    format!("local.{name}"),
                    ExecutorKind::Local(settings.clone()),
                    runner.clone(),
                )
                .with_timeout(timeout),
            );
        }

        let batch_groups: [(&str, &BTreeMap<String, BatchSettings>, fn(BatchSettings) -> ExecutorKind); 4] = [
            ("slurm", &executors.slurm, ExecutorKind::Slurm),
            ("lsf", &executors.lsf, ExecutorKind::Lsf),
            ("pbs", &executors.pbs, ExecutorKind::Pbs),
            ("torque", &executors.torque, ExecutorKind::Torque),
        ];
        for (type_name, group, kind) in batch_groups {
            for (name, settings) in group {
                let mut settings = settings.clone();
                if settings.account.is_none() {
                    settings.account = defaults.account.clone();
                }
                let max_pend_time = settings
                    .max_pend_time
                    .or(defaults.max_pend_time)
                    .map(Duration::from_secs);
                let timeout = settings.timeout_secs.map(Duration::from_secs);

                registry = registry.with_executor(
                    Executor::new(format!("{type_name}.{name}"), kind(settings), runner.clone())
                        .with_timeout(timeout)
                        .with_max_pend_time(max_pend_time),
                );
            }
        }

        for (name, settings) in &executors.container {
            let timeout = settings.timeout_secs.map(Duration::from_secs);
            registry = registry.with_executor(
                Executor::new(
                    format!("container.{name}"),
                    ExecutorKind::Container(settings.clone()),
                    runner.clone(),
                )
                .with_timeout(timeout),
            );
        }

        info!("Loaded {} executors", registry.len());
        registry
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        debug!("Registered executor {}", executor);
        self.executors.insert(executor.name().to_string(), executor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Executor> {
        self.executors.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Executor> {
        self.executors.values()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Write every executor's hook scripts under `<root>/<executor>/`
    pub async fn setup(&self, root: &Path) -> Result<()> {
        for executor in self.iter() {
            let dir = root.join(executor.name());
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

            let (before, after) = executor.kind().hooks();
            for (file, body) in [("before_script.sh", before), ("after_script.sh", after)] {
                let path = dir.join(file);
                let content = format!("#!/bin/bash\n{}\n", body.unwrap_or_default());
                tokio::fs::write(&path, content)
                    .await
                    .with_context(|| format!("Failed to write hook script: {}", path.display()))?;
            }
        }
        debug!("Executor hooks written to {}", root.display());
        Ok(())
    }
}
