//! Test executors
//!
//! One [`Executor`] exists per configured back-end name. The back-end type is
//! a closed set ([`ExecutorKind`]): local shells run tests synchronously,
//! batch schedulers and container runtimes hand back a job that is polled
//! until it reaches a terminal state.

mod batch;
mod container;
mod local;
mod registry;
mod retry;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{BatchSettings, ContainerSettings, LocalSettings};
use crate::models::{Builder, Job, JobState};
use crate::utils::{CommandError, CommandOutput, CommandRunner, CommandSpec};

use batch::Scheduler;
pub(crate) use local::remove_artifacts;
pub use registry::ExecutorRegistry;
use retry::RetryController;

/// Limit on scheduler status and cancel queries
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Executor errors
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Could not parse a job id from submit output: {0:?}")]
    InvalidJobId(String),

    #[error("Poll of job {job} failed: {reason}")]
    PollFailed { job: String, reason: String },

    #[error("Unknown state '{state}' reported for job {job}")]
    UnknownJobState { job: String, state: String },

    #[error("Cancel of job {job} failed: {reason}")]
    CancelFailed { job: String, reason: String },

    #[error("{0} has no submitted job")]
    NotSubmitted(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Back-end type together with its settings
#[derive(Clone, Debug)]
pub enum ExecutorKind {
    Local(LocalSettings),
    Slurm(BatchSettings),
    Lsf(BatchSettings),
    Pbs(BatchSettings),
    Torque(BatchSettings),
    Container(ContainerSettings),
}

impl ExecutorKind {
    /// Type tag, also the prefix of the executor name
    pub fn type_name(&self) -> &'static str {
        match self {
            ExecutorKind::Local(_) => "local",
            ExecutorKind::Slurm(_) => "slurm",
            ExecutorKind::Lsf(_) => "lsf",
            ExecutorKind::Pbs(_) => "pbs",
            ExecutorKind::Torque(_) => "torque",
            ExecutorKind::Container(_) => "container",
        }
    }

    /// Whether submitting returns before the test has run
    pub fn is_asynchronous(&self) -> bool {
        !matches!(self, ExecutorKind::Local(_))
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            ExecutorKind::Local(s) => s.description.as_deref(),
            ExecutorKind::Slurm(s)
            | ExecutorKind::Lsf(s)
            | ExecutorKind::Pbs(s)
            | ExecutorKind::Torque(s) => s.description.as_deref(),
            ExecutorKind::Container(s) => s.description.as_deref(),
        }
    }

    pub fn hooks(&self) -> (Option<&str>, Option<&str>) {
        match self {
            ExecutorKind::Local(s) => (s.before_script.as_deref(), s.after_script.as_deref()),
            ExecutorKind::Slurm(s)
            | ExecutorKind::Lsf(s)
            | ExecutorKind::Pbs(s)
            | ExecutorKind::Torque(s) => (s.before_script.as_deref(), s.after_script.as_deref()),
            ExecutorKind::Container(s) => {
                (s.before_script.as_deref(), s.after_script.as_deref())
            }
        }
    }
}

/// What a status query reported
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// Back-end keyword the state was mapped from
    pub keyword: String,
    pub exit_code: Option<i32>,
}

/// Result details collected once a job is terminal
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Gathered {
    pub exit_code: Option<i32>,
    pub outfile: Option<PathBuf>,
    pub errfile: Option<PathBuf>,
    /// Captured (stdout, stderr) to be written to the builder's output files
    pub logs: Option<(String, String)>,
}

/// Command vocabulary of an asynchronous back-end
pub trait JobBackend: Send + Sync {
    fn submit_command(&self, builder: &Builder) -> CommandSpec;

    fn parse_job_id(&self, output: &CommandOutput) -> Result<String, ExecutorError>;

    fn status_command(&self, job_id: &str) -> CommandSpec;

    fn parse_status(&self, job_id: &str, output: &CommandOutput)
        -> Result<JobStatus, ExecutorError>;

    fn gather_command(&self, job_id: &str, builder: &Builder) -> CommandSpec;

    fn parse_gather(
        &self,
        output: &CommandOutput,
        builder: &Builder,
    ) -> Result<Gathered, ExecutorError>;

    fn cancel_command(&self, job_id: &str) -> CommandSpec;
}

/// A configured back-end
pub struct Executor {
    name: String,
    kind: ExecutorKind,
    timeout: Option<Duration>,
    max_pend_time: Option<Duration>,
    runner: Arc<dyn CommandRunner>,
}

impl Executor {
    pub fn new(name: impl Into<String>, kind: ExecutorKind, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout: None,
            max_pend_time: None,
            runner,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_pend_time(mut self, max_pend_time: Option<Duration>) -> Self {
        self.max_pend_time = max_pend_time;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ExecutorKind {
        &self.kind
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Executor-level pend limit, overriding the runner default
    pub fn max_pend_time(&self) -> Option<Duration> {
        self.max_pend_time
    }

    pub(crate) async fn run_command(
        &self,
        spec: &CommandSpec,
    ) -> Result<CommandOutput, CommandError> {
        self.runner.run(spec).await
    }

    fn backend(&self) -> Option<Box<dyn JobBackend + '_>> {
        match &self.kind {
            ExecutorKind::Local(_) => None,
            ExecutorKind::Slurm(s) => Some(Box::new(Scheduler::Slurm.backend(s, self.timeout))),
            ExecutorKind::Lsf(s) => Some(Box::new(Scheduler::Lsf.backend(s, self.timeout))),
            ExecutorKind::Pbs(s) => Some(Box::new(Scheduler::Pbs.backend(s, self.timeout))),
            ExecutorKind::Torque(s) => {
                Some(Box::new(Scheduler::Torque.backend(s, self.timeout)))
            }
            ExecutorKind::Container(s) => {
                Some(Box::new(container::ContainerBackend::new(s, self.timeout)))
            }
        }
    }

    /// Start a pending builder.
    ///
    /// Local executors run the test to completion; asynchronous back-ends
    /// return as soon as the job id is known. Failures are recorded on the
    /// returned builder, never raised.
    pub async fn submit(&self, mut builder: Builder) -> Builder {
        if !builder.mark_running() {
            return builder;
        }

        match (&self.kind, self.backend()) {
            (ExecutorKind::Local(settings), _) => local::run(self, settings, builder).await,
            (_, Some(backend)) => {
                self.submit_job(backend.as_ref(), &mut builder).await;
                builder
            }
            (_, None) => {
                builder.mark_failed(format!("executor {} cannot submit jobs", self.name));
                builder
            }
        }
    }

    async fn submit_job(&self, backend: &dyn JobBackend, builder: &mut Builder) {
        let spec = backend.submit_command(builder);
        let command_line = spec.display();
        builder.result.command = Some(command_line.clone());
        debug!("{}: submitting via {}", builder, command_line);

        let output = match self.run_command(&spec).await {
            Ok(output) => output,
            Err(e) => {
                builder.mark_failed(ExecutorError::from(e).to_string());
                return;
            }
        };

        if !output.is_success() {
            let err = ExecutorError::SubmissionFailed(format!(
                "'{}' exited with {}: {}",
                command_line,
                output.returncode(),
                output.stderr.trim()
            ));
            builder.result.returncode = Some(output.returncode());
            builder.mark_failed(err.to_string());
            return;
        }

        match backend.parse_job_id(&output) {
            Ok(job_id) => {
                info!("{}: job {} dispatched to {}", builder, job_id, self);
                builder.job = Some(Job::new(job_id));
            }
            Err(e) => builder.mark_failed(e.to_string()),
        }
    }

    /// Refresh the job state of a submitted builder.
    ///
    /// Polling a builder whose job is already terminal does nothing. When the
    /// job becomes terminal, its result is gathered and the builder settled;
    /// on error nothing is changed so the next poll can retry.
    pub async fn poll(&self, builder: &mut Builder) -> Result<(), ExecutorError> {
        let Some(backend) = self.backend() else {
            return Ok(());
        };
        let Some(job) = builder.job.as_ref() else {
            return Err(ExecutorError::NotSubmitted(builder.to_string()));
        };
        if job.is_terminal() || builder.is_terminal() {
            return Ok(());
        }
        let job_id = job.id.clone();

        let output = self
            .run_command(&backend.status_command(&job_id).timeout(Some(QUERY_TIMEOUT)))
            .await?;
        if !output.is_success() {
            return Err(ExecutorError::PollFailed {
                job: job_id,
                reason: format!("status query exited with {}", output.returncode()),
            });
        }
        let status = backend.parse_status(&job_id, &output)?;
        debug!(
            "{}: job {} reported '{}' ({})",
            builder, job_id, status.keyword, status.state
        );

        if !status.state.is_terminal() {
            if let Some(job) = builder.job.as_mut() {
                job.observe(status.state);
            }
            return Ok(());
        }

        let gathered = match self.gather(backend.as_ref(), &job_id, builder).await {
            Ok(gathered) => gathered,
            Err(e) if status.state == JobState::Cancelled => {
                debug!("{}: nothing gathered for cancelled job: {}", builder, e);
                Gathered::default()
            }
            Err(e) => return Err(e),
        };

        let exit_code = gathered.exit_code.or(status.exit_code);
        if let Some(job) = builder.job.as_mut() {
            job.observe(status.state);
            job.exit_code = exit_code;
        }
        builder.result.outfile = gathered.outfile.or(builder.result.outfile.take());
        builder.result.errfile = gathered.errfile.or(builder.result.errfile.take());

        match (status.state, exit_code) {
            (JobState::Cancelled, _) => {
                builder.result.returncode = exit_code;
                builder.mark_failed(format!("job {job_id} was cancelled"));
            }
            (_, Some(code)) => {
                info!("{}: job {} complete with returncode {}", builder, job_id, code);
                builder.finish(code);
            }
            (_, None) => builder.mark_failed(format!("job {job_id} reported no exit code")),
        }

        builder.record_job_runtime();
        Ok(())
    }

    async fn gather(
        &self,
        backend: &dyn JobBackend,
        job_id: &str,
        builder: &Builder,
    ) -> Result<Gathered, ExecutorError> {
        let spec = backend
            .gather_command(job_id, builder)
            .timeout(Some(QUERY_TIMEOUT));
        let output = self.run_command(&spec).await?;
        if !output.is_success() {
            return Err(ExecutorError::PollFailed {
                job: job_id.to_string(),
                reason: format!("'{}' exited with {}", spec.display(), output.returncode()),
            });
        }

        let mut gathered = backend.parse_gather(&output, builder)?;
        if let Some((stdout, stderr)) = gathered.logs.take() {
            let outfile = builder.output_path();
            let errfile = builder.error_path();
            if let Err(e) = tokio::fs::write(&outfile, stdout).await {
                warn!("{}: could not write {}: {}", builder, outfile.display(), e);
            }
            if let Err(e) = tokio::fs::write(&errfile, stderr).await {
                warn!("{}: could not write {}: {}", builder, errfile.display(), e);
            }
            gathered.outfile = Some(outfile);
            gathered.errfile = Some(errfile);
        }
        Ok(gathered)
    }

    /// Cancel the builder's job. The job is marked CANCELLED only when the
    /// cancel command succeeds; settling the builder is left to the caller.
    pub async fn cancel(&self, builder: &mut Builder) -> Result<(), ExecutorError> {
        let Some(backend) = self.backend() else {
            return Ok(());
        };
        let Some(job) = builder.job.as_ref() else {
            return Err(ExecutorError::NotSubmitted(builder.to_string()));
        };
        let job_id = job.id.clone();

        let spec = backend
            .cancel_command(&job_id)
            .timeout(Some(QUERY_TIMEOUT));
        info!("{}: cancelling job {} via {}", builder, job_id, spec.display());

        let output = self.run_command(&spec).await?;
        if !output.is_success() {
            return Err(ExecutorError::CancelFailed {
                job: job_id,
                reason: output.stderr.trim().to_string(),
            });
        }

        if let Some(job) = builder.job.as_mut() {
            job.observe(JobState::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.kind.type_name())
    }
}

/// Split configured flag strings like `"-C haswell"` into arguments
pub(crate) fn split_options(options: &[String]) -> Vec<String> {
    options
        .iter()
        .flat_map(|o| o.split_whitespace())
        .map(str::to_string)
        .collect()
}
