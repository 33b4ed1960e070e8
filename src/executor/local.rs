//! Local shell execution
//!
//! The test script runs to completion inside the worker that submitted it.

use tracing::{info, warn};

use super::{Executor, RetryController};
use crate::config::LocalSettings;
use crate::models::Builder;
use crate::utils::{CommandSpec, Timer};

pub(super) async fn run(executor: &Executor, settings: &LocalSettings, mut builder: Builder) -> Builder {
    let spec = CommandSpec::new(&settings.shell)
        .arg(builder.script.display().to_string())
        .current_dir(builder.stage_dir())
        .timeout(executor.timeout());
    builder.result.command = Some(spec.display());
    info!("{}: running {} on {}", builder, spec.display(), executor.name());

    let label = builder.to_string();
    let timer = Timer::start(label.clone());
    let outcome = RetryController::new(builder.retry)
        .run(&label, || executor.run_command(&spec))
        .await;
    timer.stop();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            builder.mark_failed(e.to_string());
            return builder;
        }
    };

    let outfile = builder.output_path();
    let errfile = builder.error_path();
    if let Err(e) = tokio::fs::write(&outfile, &outcome.output.stdout).await {
        warn!("{}: could not write {}: {}", builder, outfile.display(), e);
    }
    if let Err(e) = tokio::fs::write(&errfile, &outcome.output.stderr).await {
        warn!("{}: could not write {}: {}", builder, errfile.display(), e);
    }
    builder.result.outfile = Some(outfile);
    builder.result.errfile = Some(errfile);
    builder.result.attempts = outcome.returncodes;

    if outcome.output.timed_out {
        if let Some(limit) = executor.timeout() {
            builder.result.message = Some(format!("killed after {}s timeout", limit.as_secs()));
        }
    }

    let code = outcome.output.returncode();
    builder.finish(code);
    info!("{}: {} with returncode {}", builder, builder.state, code);
    builder
}

/// Remove the output files of a local run that did not finish
pub(crate) async fn remove_artifacts(builder: &Builder) {
    for path in [builder.output_path(), builder.error_path()] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("{}: removed partial output {}", builder, path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("{}: could not remove {}: {}", builder, path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorKind;
    use crate::models::BuilderState;
    use crate::utils::command::mock::ScriptedRunner;
    use crate::utils::{CommandOutput, ProcessRunner};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn local(runner: Arc<dyn crate::utils::CommandRunner>) -> Executor {
        Executor::new("local.bash", ExecutorKind::Local(LocalSettings::default()), runner)
    }

    #[tokio::test]
    async fn test_local_success_writes_output() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| CommandOutput::with_code(0, "hello\n")).shared();
        let executor = local(runner.clone());

        let builder = Builder::new("hello", "1", "local.bash", dir.path().join("hello.sh"));
        let builder = executor.submit(builder).await;

        assert_eq!(builder.state, BuilderState::Complete);
        assert_eq!(builder.result.returncode, Some(0));
        assert_eq!(builder.result.attempts, vec![0]);
        assert!(builder.job.is_none());
        let out = std::fs::read_to_string(dir.path().join("hello.out")).unwrap();
        assert_eq!(out, "hello\n");

        let call = &runner.calls()[0];
        assert_eq!(call.program, "bash");
        assert_eq!(call.cwd.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_retry_two_performs_three_attempts() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| CommandOutput::with_code(7, "")).shared();
        let executor = local(runner.clone());

        let builder = Builder::new("flaky", "1", "local.bash", dir.path().join("flaky.sh"))
            .with_retry(2);
        let builder = executor.submit(builder).await;

        assert_eq!(runner.count("bash"), 3);
        assert_eq!(builder.state, BuilderState::Failed);
        assert_eq!(builder.result.returncode, Some(7));
        assert_eq!(builder.result.attempts, vec![7, 7, 7]);
    }

    #[tokio::test]
    async fn test_real_script_and_timeout() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "echo started\nsleep 5\n").unwrap();

        let executor = Executor::new(
            "local.sh",
            ExecutorKind::Local(LocalSettings {
                shell: "sh".to_string(),
                ..Default::default()
            }),
            Arc::new(ProcessRunner),
        )
        .with_timeout(Some(Duration::from_millis(200)));

        let builder = executor
            .submit(Builder::new("slow", "1", "local.sh", &script))
            .await;
        assert_eq!(builder.state, BuilderState::Failed);
        assert_eq!(builder.result.returncode, Some(-1));
        assert!(builder.result.message.is_some());
    }

    #[tokio::test]
    async fn test_missing_shell_fails_without_retry() {
        let dir = tempdir().unwrap();
        let executor = Executor::new(
            "local.nosuch",
            ExecutorKind::Local(LocalSettings {
                shell: "/nonexistent/shell".to_string(),
                ..Default::default()
            }),
            Arc::new(ProcessRunner),
        );

        let builder = Builder::new("t", "1", "local.nosuch", dir.path().join("t.sh")).with_retry(3);
        let builder = executor.submit(builder).await;
        assert_eq!(builder.state, BuilderState::Failed);
        assert!(builder.result.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_remove_artifacts() {
        let dir = tempdir().unwrap();
        let builder = Builder::new("t", "1", "local.bash", dir.path().join("t.sh"));
        std::fs::write(builder.output_path(), "partial").unwrap();

        remove_artifacts(&builder).await;
        assert!(!builder.output_path().exists());
    }
}
