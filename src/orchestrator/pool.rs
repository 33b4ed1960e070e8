//! Bounded worker pool for the dispatch step
//!
//! Each eligible builder is moved into its own task and handed back once
//! `submit` returns; workers never touch the global builder set.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use super::wait_for_shutdown;
use crate::executor::ExecutorRegistry;
use crate::models::Builder;

/// Builders returned from one dispatch round
#[derive(Debug, Default)]
pub struct Dispatch {
    pub builders: Vec<Builder>,
    pub interrupted: bool,
}

pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// Pool of `size` workers, capped by host parallelism
    pub fn new(size: usize) -> Self {
        let host = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_exact_size(size.min(host))
    }

    /// Pool of exactly `size` workers, ignoring host parallelism
    pub(crate) fn with_exact_size(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit every builder, at most `size` at a time.
    ///
    /// On shutdown the outstanding workers are aborted and only the builders
    /// that were settled before dispatch are returned.
    pub async fn dispatch(
        &self,
        builders: Vec<Builder>,
        registry: &Arc<ExecutorRegistry>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Dispatch {
        let semaphore = Arc::new(Semaphore::new(self.size));
        let mut settled = Vec::new();
        let mut originals = Vec::new();
        let mut handles = Vec::new();

        info!(
            "Dispatching {} builders with {} workers",
            builders.len(),
            self.size
        );

        for mut builder in builders {
            if registry.get(&builder.executor).is_none() {
                let reason = format!("unknown executor '{}'", builder.executor);
                builder.mark_failed(reason);
                settled.push(builder);
                continue;
            }

            let semaphore = semaphore.clone();
            let registry = registry.clone();
            originals.push(builder.clone());

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    builder.mark_failed("worker pool closed before dispatch");
                    return builder;
                };

                debug!("{}: submitting to {}", builder, builder.executor);
                match registry.get(&builder.executor) {
                    Some(executor) => executor.submit(builder).await,
                    None => builder,
                }
            });
            handles.push(handle);
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        tokio::select! {
            joined = join_all(handles) => {
                for (original, result) in originals.into_iter().zip(joined) {
                    match result {
                        Ok(builder) => settled.push(builder),
                        Err(e) => {
                            let mut builder = original;
                            warn!("{}: worker did not return: {}", builder, e);
                            builder.mark_failed(format!("worker failed: {e}"));
                            settled.push(builder);
                        }
                    }
                }
                Dispatch { builders: settled, interrupted: false }
            }
            _ = wait_for_shutdown(shutdown) => {
                warn!("Shutdown requested, aborting {} workers", aborts.len());
                for abort in aborts {
                    abort.abort();
                }
                Dispatch { builders: settled, interrupted: true }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalSettings;
    use crate::executor::{Executor, ExecutorKind};
    use crate::models::BuilderState;
    use crate::utils::command::mock::ScriptedRunner;
    use crate::utils::CommandOutput;
    use std::time::Duration;
    use tempfile::tempdir;

    fn registry(runner: Arc<ScriptedRunner>) -> Arc<ExecutorRegistry> {
        Arc::new(ExecutorRegistry::new().with_executor(Executor::new(
            "local.bash",
            ExecutorKind::Local(LocalSettings::default()),
            runner,
        )))
    }

    #[test]
    fn test_size_is_capped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
        let host = std::thread::available_parallelism().unwrap().get();
        assert_eq!(WorkerPool::new(10_000).size(), host);
        assert_eq!(WorkerPool::with_exact_size(64).size(), 64);
        assert_eq!(WorkerPool::with_exact_size(0).size(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_runs_exactly_pool_size_at_once() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::succeeding()
            .with_delay(Duration::from_millis(50))
            .shared();
        let registry = registry(runner.clone());
        let pool = WorkerPool::with_exact_size(2);

        let builders: Vec<Builder> = (0..6)
            .map(|i| {
                Builder::new(
                    format!("t{i}"),
                    format!("id{i}"),
                    "local.bash",
                    dir.path().join(format!("t{i}.sh")),
                )
            })
            .collect();

        let (_tx, mut rx) = watch::channel(false);
        let dispatch = pool.dispatch(builders, &registry, &mut rx).await;

        assert!(!dispatch.interrupted);
        assert_eq!(dispatch.builders.len(), 6);
        assert!(dispatch
            .builders
            .iter()
            .all(|b| b.state == BuilderState::Complete));
        assert_eq!(runner.peak_concurrency(), 2);
        assert_eq!(runner.count("bash"), 6);
    }

    #[tokio::test]
    async fn test_unknown_executor_fails_only_that_builder() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| CommandOutput::with_code(0, "")).shared();
        let registry = registry(runner);

        let builders = vec![
            Builder::new("ok", "1", "local.bash", dir.path().join("ok.sh")),
            Builder::new("bad", "2", "slurm.missing", dir.path().join("bad.sh")),
        ];
        let (_tx, mut rx) = watch::channel(false);
        let dispatch = WorkerPool::new(2).dispatch(builders, &registry, &mut rx).await;

        let bad = dispatch.builders.iter().find(|b| b.id == "2").unwrap();
        assert_eq!(bad.state, BuilderState::Failed);
        let ok = dispatch.builders.iter().find(|b| b.id == "1").unwrap();
        assert_eq!(ok.state, BuilderState::Complete);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_dispatch() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::succeeding()
            .with_delay(Duration::from_secs(30))
            .shared();
        let registry = registry(runner);
        let builders = vec![Builder::new("slow", "1", "local.bash", dir.path().join("s.sh"))];

        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let dispatch = WorkerPool::new(1).dispatch(builders, &registry, &mut rx).await;
        assert!(dispatch.interrupted);
        assert!(dispatch.builders.is_empty());
    }
}
