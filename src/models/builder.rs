//! Builder: one materialized test instance and its run state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::job::Job;

/// Lifecycle state of a builder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuilderState {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl BuilderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuilderState::Complete | BuilderState::Failed)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BuilderState::Pending => "○",
            BuilderState::Running => "…",
            BuilderState::Complete => "✓",
            BuilderState::Failed => "✗",
        }
    }
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderState::Pending => write!(f, "PENDING"),
            BuilderState::Running => write!(f, "RUNNING"),
            BuilderState::Complete => write!(f, "COMPLETE"),
            BuilderState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A `needs` entry: the named test must finish first, optionally with a
/// given final state and/or a return code from the given set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BuilderState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returncode: Option<Vec<i32>>,
}

impl Dependency {
    /// Whether `other` (already terminal) meets this entry's qualifiers
    pub fn satisfied_by(&self, other: &Builder) -> bool {
        if let Some(expected) = self.state {
            if other.state != expected {
                return false;
            }
        }
        if let Some(codes) = &self.returncode {
            match other.result.returncode {
                Some(code) if codes.contains(&code) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Outcome of running a builder
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub returncode: Option<i32>,
    pub runtime: Option<Duration>,
    pub starttime: Option<DateTime<Utc>>,
    pub endtime: Option<DateTime<Utc>>,

    /// Command used to launch or submit the test
    pub command: Option<String>,

    pub outfile: Option<PathBuf>,
    pub errfile: Option<PathBuf>,

    /// Return code of every local attempt, retries included
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<i32>,

    /// Why the builder failed, when it did not simply exit non-zero
    pub message: Option<String>,
}

/// One concrete test instance produced by the build stage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Builder {
    pub name: String,

    /// Unique test id
    pub id: String,

    /// Executor name, e.g. `local.bash` or `slurm.debug`
    pub executor: String,

    /// Generated test script
    pub script: PathBuf,

    /// Directory the test runs in, defaults to the script's directory
    #[serde(default)]
    pub stage_dir: Option<PathBuf>,

    #[serde(default)]
    pub needs: Vec<Dependency>,

    /// Additional attempts after a failed local run
    #[serde(default)]
    pub retry: u32,

    #[serde(default)]
    pub numprocs: Option<u32>,

    #[serde(default)]
    pub numnodes: Option<u32>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub state: BuilderState,

    #[serde(default)]
    pub result: RunResult,

    #[serde(default)]
    pub job: Option<Job>,
}

impl Builder {
    pub fn stage_dir(&self) -> PathBuf {
        match &self.stage_dir {
            Some(dir) => dir.clone(),
            None => self
                .script
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.stage_dir().join(format!("{}.out", self.name))
    }

    pub fn error_path(&self) -> PathBuf {
        self.stage_dir().join(format!("{}.err", self.name))
    }

    pub fn is_pending(&self) -> bool {
        self.state == BuilderState::Pending
    }

    pub fn is_running(&self) -> bool {
        self.state == BuilderState::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// A builder with a scheduler/container job that needs polling
    pub fn is_batch_job(&self) -> bool {
        self.job.is_some()
    }

    /// PENDING -> RUNNING; refuses any other starting state
    pub fn mark_running(&mut self) -> bool {
        if self.state != BuilderState::Pending {
            warn!("{}: cannot start from state {}", self, self.state);
            return false;
        }
        self.state = BuilderState::Running;
        self.result.starttime = Some(Utc::now());
        debug!("{}: RUNNING", self);
        true
    }

    pub fn mark_complete(&mut self) {
        self.state = BuilderState::Complete;
        self.record_endtime();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("{}: FAILED - {}", self, reason);
        self.state = BuilderState::Failed;
        self.result.message = Some(reason);
        self.record_endtime();
    }

    /// Settle the final state from a return code: zero is COMPLETE
    pub fn finish(&mut self, returncode: i32) {
        self.result.returncode = Some(returncode);
        if returncode == 0 {
            self.mark_complete();
        } else {
            self.state = BuilderState::Failed;
            self.record_endtime();
        }
    }

    /// Report the job's execution time as the runtime; queue time stays in
    /// the job's `pend_time`
    pub fn record_job_runtime(&mut self) {
        if let Some(job) = self.job.as_ref() {
            self.result.runtime = Some(job.elapsed);
        }
    }

    fn record_endtime(&mut self) {
        let end = Utc::now();
        self.result.endtime = Some(end);
        if let Some(start) = self.result.starttime {
            self.result.runtime = (end - start).to_std().ok();
        }
    }
}

/// Builders normally arrive from the build stage's file; these
/// constructors exist for unit tests
#[cfg(test)]
impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: None,
            returncode: None,
        }
    }

    pub fn with_state(mut self, state: BuilderState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_returncodes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.returncode = Some(codes.into());
        self
    }
}

#[cfg(test)]
impl Builder {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        executor: impl Into<String>,
        script: impl AsRef<Path>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            executor: executor.into(),
            script: script.as_ref().to_path_buf(),
            stage_dir: None,
            needs: Vec::new(),
            retry: 0,
            numprocs: None,
            numnodes: None,
            tags: Vec::new(),
            state: BuilderState::Pending,
            result: RunResult::default(),
            job: None,
        }
    }

    pub fn with_needs(mut self, needs: impl IntoIterator<Item = Dependency>) -> Self {
        self.needs.extend(needs);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_resources(mut self, numprocs: Option<u32>, numnodes: Option<u32>) -> Self {
        self.numprocs = numprocs;
        self.numnodes = numnodes;
        self
    }
}

impl fmt::Display for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id: String = self.id.chars().take(8).collect();
        write!(f, "{}/{}", self.name, short_id)
    }
}
