//! Container runtime back-end (docker or podman)
//!
//! Tests run in a detached container with the stage directory bind-mounted
//! at the same path; the container id plays the role of a job id.

use std::time::Duration;

use super::{split_options, ExecutorError, Gathered, JobBackend, JobStatus};
use crate::config::ContainerSettings;
use crate::models::{Builder, JobState};
use crate::utils::{CommandOutput, CommandSpec};

pub struct ContainerBackend<'a> {
    settings: &'a ContainerSettings,
    timeout: Option<Duration>,
}

impl<'a> ContainerBackend<'a> {
    pub fn new(settings: &'a ContainerSettings, timeout: Option<Duration>) -> Self {
        Self { settings, timeout }
    }

    fn runtime(&self) -> CommandSpec {
        CommandSpec::new(&self.settings.runtime)
    }
}

fn map_state(status: &str) -> Option<JobState> {
    let state = match status {
        "created" => JobState::Pending,
        "running" | "restarting" => JobState::Running,
        "paused" => JobState::Suspended,
        "exited" | "dead" => JobState::Complete,
        "removing" => JobState::Cancelled,
        _ => return None,
    };
    Some(state)
}

impl JobBackend for ContainerBackend<'_> {
    fn submit_command(&self, builder: &Builder) -> CommandSpec {
        let stage = builder.stage_dir();
        let stage = stage.display().to_string();
        self.runtime()
            .args(["run", "-d"])
            .arg("-v")
            .arg(format!("{stage}:{stage}"))
            .arg("-w")
            .arg(&stage)
            .args(split_options(&self.settings.options))
            .arg(&self.settings.image)
            .arg(&self.settings.shell)
            .arg(builder.script.display().to_string())
            .timeout(self.timeout)
    }

    fn parse_job_id(&self, output: &CommandOutput) -> Result<String, ExecutorError> {
        output
            .lines()
            .into_iter()
            .last()
            .filter(|id| id.len() >= 12 && id.chars().all(|c| c.is_ascii_hexdigit()))
            .map(str::to_string)
            .ok_or_else(|| ExecutorError::InvalidJobId(output.stdout.trim().to_string()))
    }

    fn status_command(&self, job_id: &str) -> CommandSpec {
        self.runtime()
            .args(["inspect", "-f", "{{.State.Status}}|{{.State.ExitCode}}", job_id])
    }

    // `exited|0`
    fn parse_status(
        &self,
        job_id: &str,
        output: &CommandOutput,
    ) -> Result<JobStatus, ExecutorError> {
        let line = output
            .lines()
            .first()
            .copied()
            .ok_or_else(|| ExecutorError::PollFailed {
                job: job_id.to_string(),
                reason: "inspect reported nothing".to_string(),
            })?;
        let (status, code) = line.split_once('|').unwrap_or((line, ""));

        let state = map_state(status).ok_or_else(|| ExecutorError::UnknownJobState {
            job: job_id.to_string(),
            state: status.to_string(),
        })?;

        Ok(JobStatus {
            state,
            keyword: status.to_string(),
            exit_code: code.trim().parse().ok(),
        })
    }

    fn gather_command(&self, job_id: &str, _builder: &Builder) -> CommandSpec {
        self.runtime().args(["logs", job_id])
    }

    fn parse_gather(
        &self,
        output: &CommandOutput,
        _builder: &Builder,
    ) -> Result<Gathered, ExecutorError> {
        Ok(Gathered {
            logs: Some((output.stdout.clone(), output.stderr.clone())),
            ..Default::default()
        })
    }

    fn cancel_command(&self, job_id: &str) -> CommandSpec {
        self.runtime().args(["rm", "-f", job_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, ExecutorKind};
    use crate::models::BuilderState;
    use crate::utils::command::mock::ScriptedRunner;
    use tempfile::tempdir;

    const CONTAINER_ID: &str = "3f4e5d6c7b8a9f0e1d2c3b4a";

    #[test]
    fn test_submit_command_mounts_stage() {
        let settings = ContainerSettings::new("ubuntu:22.04");
        let backend = ContainerBackend::new(&settings, None);
        let builder = Builder::new("t", "1", "container.ubuntu", "/stage/t/run.sh");

        let spec = backend.submit_command(&builder);
        assert_eq!(
            spec.display(),
            "docker run -d -v /stage/t:/stage/t -w /stage/t ubuntu:22.04 sh /stage/t/run.sh"
        );
    }

    #[test]
    fn test_parse_status() {
        let settings = ContainerSettings::new("alpine");
        let backend = ContainerBackend::new(&settings, None);

        let status = backend
            .parse_status("c", &CommandOutput::with_code(0, "exited|3\n"))
            .unwrap();
        assert_eq!(status.state, JobState::Complete);
        assert_eq!(status.exit_code, Some(3));

        let status = backend
            .parse_status("c", &CommandOutput::with_code(0, "running|0"))
            .unwrap();
        assert_eq!(status.state, JobState::Running);

        assert!(backend
            .parse_status("c", &CommandOutput::with_code(0, "zombie|0"))
            .is_err());
    }

    #[test]
    fn test_container_id_validation() {
        let settings = ContainerSettings::new("alpine");
        let backend = ContainerBackend::new(&settings, None);
        let ok = CommandOutput::with_code(0, format!("{CONTAINER_ID}\n"));
        assert_eq!(backend.parse_job_id(&ok).unwrap(), CONTAINER_ID);
        let bad = CommandOutput::with_code(0, "Unable to find image");
        assert!(backend.parse_job_id(&bad).is_err());
    }

    #[tokio::test]
    async fn test_container_run_writes_logs() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("run.sh");

        let runner = ScriptedRunner::new(|spec| match spec.args.first().map(String::as_str) {
            Some("run") => CommandOutput::with_code(0, CONTAINER_ID),
            Some("inspect") => CommandOutput::with_code(0, "exited|0"),
            Some("logs") => CommandOutput::with_code(0, "hello\n").with_stderr("warn\n"),
            _ => CommandOutput::with_code(1, ""),
        })
        .shared();
        let executor = Executor::new(
            "container.alpine",
            ExecutorKind::Container(ContainerSettings::new("alpine")),
            runner,
        );

        let builder = Builder::new("hello", "1", "container.alpine", &script);
        let mut builder = executor.submit(builder).await;
        assert!(builder.is_batch_job());

        executor.poll(&mut builder).await.unwrap();
        assert_eq!(builder.state, BuilderState::Complete);

        let out = std::fs::read_to_string(dir.path().join("hello.out")).unwrap();
        assert_eq!(out, "hello\n");
        let err = std::fs::read_to_string(dir.path().join("hello.err")).unwrap();
        assert_eq!(err, "warn\n");
    }
}
