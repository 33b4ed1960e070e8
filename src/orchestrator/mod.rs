//! Test orchestration
//!
//! Drives every builder from PENDING to a terminal state in waves:
//! resolve dependencies, dispatch the eligible builders through the worker
//! pool, then poll the wave's batch jobs until they finish.

mod poller;
mod pool;
mod resolver;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::executor::{remove_artifacts, ExecutorRegistry};
use crate::models::{Builder, BuilderState};
use crate::utils::WaveClock;

use poller::Poller;
use pool::WorkerPool;
use resolver::DependencyResolver;

/// Fatal orchestration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("No runnable work: {pending} builders are pending but none is eligible (dependency cycle?)")]
    NoRunnableWork { pending: usize },

    #[error("Run interrupted")]
    Interrupted,
}

/// Orchestrator settings
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub pool_size: usize,
    pub max_jobs: Option<usize>,
    pub poll_interval: Duration,
    pub max_pend_time: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for OrchestratorConfig {
    fn from(runner: &RunnerConfig) -> Self {
        Self {
            pool_size: runner.pool_size,
            max_jobs: runner.max_jobs,
            poll_interval: runner.poll_interval(),
            max_pend_time: runner.max_pend_time(),
        }
    }
}

/// Counts for a finished run
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub complete: usize,
    pub failed: usize,
    pub waves: usize,
    pub duration: Duration,
}

impl RunSummary {
    pub fn new(builders: &[Builder], waves: usize, duration: Duration) -> Self {
        let count = |state: BuilderState| builders.iter().filter(|b| b.state == state).count();
        Self {
            total: builders.len(),
            complete: count(BuilderState::Complete),
            failed: count(BuilderState::Failed),
            waves,
            duration,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.complete as f64 / self.total as f64) * 100.0
        }
    }
}

/// Owns the global builder set and the executor registry
pub struct Orchestrator {
    registry: Arc<ExecutorRegistry>,
    config: OrchestratorConfig,
    builders: Vec<Builder>,
    waves: usize,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        config: OrchestratorConfig,
        builders: Vec<Builder>,
    ) -> Self {
        Self {
            registry,
            config,
            builders,
            waves: 0,
        }
    }

    pub fn builders(&self) -> &[Builder] {
        &self.builders
    }

    /// Waves dispatched so far, also after a fatal error
    pub fn waves(&self) -> usize {
        self.waves
    }

    pub fn into_builders(self) -> Vec<Builder> {
        self.builders
    }

    /// Run until no builder is PENDING or RUNNING
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, OrchestratorError> {
        let pool = WorkerPool::new(self.config.pool_size);
        let poller = Poller::new(self.config.poll_interval, self.config.max_pend_time);
        let mut clock = WaveClock::new();
        let mut waves = 0;

        info!(
            "Running {} builders with {} workers",
            self.builders.len(),
            pool.size()
        );

        loop {
            if *shutdown.borrow() {
                return Err(self.interrupt().await);
            }

            self.fail_untracked();

            let pending = self.builders.iter().filter(|b| b.is_pending()).count();
            let mut dispatched = 0;
            let running = self
                .builders
                .iter()
                .any(|b| b.is_running() && b.is_batch_job());
            if pending == 0 && !running {
                break;
            }

            if pending > 0 {
                let resolution = DependencyResolver::resolve(&self.builders);
                let resolved_failures = resolution.failed.len();
                for (id, reason) in resolution.failed {
                    if let Some(builder) = self.builders.iter_mut().find(|b| b.id == id) {
                        builder.mark_failed(reason);
                    }
                }

                let mut eligible = resolution.eligible;
                if let Some(max) = self.config.max_jobs {
                    eligible.truncate(max);
                }

                if eligible.is_empty() {
                    if resolved_failures > 0 {
                        continue;
                    }
                    if !running {
                        let err = OrchestratorError::NoRunnableWork { pending };
                        error!("{}", err);
                        return Err(err);
                    }
                } else {
                    waves += 1;
                    self.waves = waves;
                    dispatched = eligible.len();
                    info!(
                        "Wave {}: dispatching {} builders, {} blocked",
                        waves,
                        eligible.len(),
                        resolution.blocked.len()
                    );

                    let batch: Vec<Builder> = self
                        .builders
                        .iter()
                        .filter(|b| eligible.contains(&b.id))
                        .cloned()
                        .collect();
                    let dispatch = pool.dispatch(batch, &self.registry, &mut shutdown).await;
                    self.merge(dispatch.builders);
                    if dispatch.interrupted {
                        return Err(self.interrupt().await);
                    }
                }
            }

            let to_poll: Vec<Builder> = self
                .builders
                .iter()
                .filter(|b| b.is_running() && b.is_batch_job())
                .cloned()
                .collect();
            if !to_poll.is_empty() {
                info!("Polling {} batch jobs", to_poll.len());
                let outcome = poller.poll(to_poll, &self.registry, &mut shutdown).await;
                self.merge(outcome.builders);
                if outcome.interrupted {
                    return Err(self.interrupt().await);
                }
            }

            let took = clock.finish_wave(waves, dispatched);
            let summary = RunSummary::new(&self.builders, waves, clock.total());
            info!(
                "Wave {} finished in {:.1}s: {} complete, {} failed, {} remaining",
                waves,
                took.as_secs_f64(),
                summary.complete,
                summary.failed,
                summary.total - summary.complete - summary.failed
            );
        }

        if let Some(slowest) = clock.slowest() {
            debug!(
                "Slowest wave: {} ({} builders, {:.1}s)",
                slowest.wave,
                slowest.dispatched,
                slowest.duration.as_secs_f64()
            );
        }
        let summary = RunSummary::new(&self.builders, waves, clock.total());
        info!(
            "Run finished in {:.1}s: {}/{} complete ({:.1}%)",
            summary.duration.as_secs_f64(),
            summary.complete,
            summary.total,
            summary.success_rate()
        );
        Ok(summary)
    }

    /// Settle RUNNING builders that have no live job left to poll
    fn fail_untracked(&mut self) {
        for builder in self.builders.iter_mut().filter(|b| b.is_running()) {
            if builder.job.as_ref().is_some_and(|j| !j.is_terminal()) {
                continue;
            }
            builder.mark_failed("running with no active job to track");
        }
    }

    /// Replace builders by id with their updated copies
    fn merge(&mut self, updated: Vec<Builder>) {
        let index: HashMap<String, usize> = self
            .builders
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();

        for builder in updated {
            match index.get(&builder.id) {
                Some(&i) => self.builders[i] = builder,
                None => warn!("{}: returned builder is not part of this run", builder),
            }
        }
    }

    /// Cancel outstanding jobs and remove partial local output
    async fn interrupt(&mut self) -> OrchestratorError {
        warn!("Interrupted, cancelling outstanding work");
        let registry = &self.registry;

        for builder in self.builders.iter_mut().filter(|b| !b.is_terminal()) {
            let Some(executor) = registry.get(&builder.executor) else {
                continue;
            };

            if builder.job.as_ref().is_some_and(|j| !j.is_terminal()) {
                if let Err(e) = executor.cancel(builder).await {
                    warn!("{}: {}", builder, e);
                }
                builder.mark_failed("cancelled on interrupt");
                builder.record_job_runtime();
            } else if !executor.kind().is_asynchronous() {
                remove_artifacts(builder).await;
            }
        }

        OrchestratorError::Interrupted
    }
}

/// Resolve once shutdown has been requested; never if the sender is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
