//! Batch job poller
//!
//! Blocks a wave until every job it submitted is terminal. The interval
//! sleep is the only suspension point and also where shutdown is noticed.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::wait_for_shutdown;
use crate::executor::{Executor, ExecutorRegistry};
use crate::models::{Builder, JobState};
use crate::output::{OutputFormat, ResultFormatter};

/// Tracked builders after polling stopped
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub builders: Vec<Builder>,
    pub interrupted: bool,
}

pub struct Poller {
    interval: Duration,
    max_pend_time: Duration,
}

impl Poller {
    pub fn new(interval: Duration, max_pend_time: Duration) -> Self {
        Self {
            interval,
            max_pend_time,
        }
    }

    fn is_tracked(builder: &Builder) -> bool {
        builder.is_running() && builder.job.as_ref().is_some_and(|j| !j.is_terminal())
    }

    /// Poll `builders` every interval until none of their jobs is active
    pub async fn poll(
        &self,
        mut builders: Vec<Builder>,
        registry: &ExecutorRegistry,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PollOutcome {
        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let mut tick = 0u64;

        loop {
            tick += 1;
            let mut active = 0;

            for builder in builders.iter_mut().filter(|b| Self::is_tracked(b)) {
                let Some(executor) = registry.get(&builder.executor) else {
                    let reason = format!("unknown executor '{}'", builder.executor);
                    builder.mark_failed(reason);
                    continue;
                };

                if let Err(e) = executor.poll(builder).await {
                    warn!("{}: poll failed, retrying next tick: {}", builder, e);
                }
                if !Self::is_tracked(builder) {
                    continue;
                }

                let limit = executor.max_pend_time().unwrap_or(self.max_pend_time);
                let pend_time = builder.job.as_ref().filter(|j| j.is_pending()).map(|j| j.pend_time);
                match pend_time {
                    Some(pend_time) if pend_time > limit => {
                        self.cancel(executor, builder, pend_time, limit).await
                    }
                    _ => active += 1,
                }
            }

            let tracked: Vec<&Builder> = builders
                .iter()
                .filter(|b| Self::is_tracked(b))
                .collect();
            if tracked.is_empty() {
                debug!("Poll tick {}: no active jobs left", tick);
                break;
            }

            info!(
                "Poll tick {}: {} active jobs, next poll in {}s\n{}",
                tick,
                active,
                self.interval.as_secs(),
                formatter.format_job_table(&tracked)
            );
            let waiting = tracked.len();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = wait_for_shutdown(shutdown) => {
                    warn!("Shutdown requested while polling {} jobs", waiting);
                    return PollOutcome { builders, interrupted: true };
                }
            }
        }

        PollOutcome {
            builders,
            interrupted: false,
        }
    }

    async fn cancel(
        &self,
        executor: &Executor,
        builder: &mut Builder,
        pend_time: Duration,
        limit: Duration,
    ) {
        let reason = format!(
            "job pending for {:.1}s exceeded max pend time of {}s",
            pend_time.as_secs_f64(),
            limit.as_secs()
        );
        info!("{}: {}, cancelling", builder, reason);

        if let Err(e) = executor.cancel(builder).await {
            warn!("{}: {}", builder, e);
        }
        if let Some(job) = builder.job.as_mut() {
            job.observe(JobState::Cancelled);
        }
        builder.mark_failed(reason);
        builder.record_job_runtime();
    }
}
