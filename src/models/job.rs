//! Scheduler-side job handle
//!
//! A [`Job`] exists only once a builder has been submitted to an
//! asynchronous back-end (batch scheduler or container runtime).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Canonical, back-end independent job state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Complete,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Suspended => "SUSPENDED",
            JobState::Complete => "COMPLETE",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted batch or container job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Scheduler-assigned job id
    pub id: String,

    pub state: JobState,

    /// Every distinct state observed, in order
    pub history: Vec<JobState>,

    /// Time spent running (zero while queued)
    pub elapsed: Duration,

    /// Time spent queued before starting to run
    pub pend_time: Duration,

    /// Exit code reported by the back-end once complete
    pub exit_code: Option<i32>,

    #[serde(skip)]
    submitted: Option<Instant>,

    #[serde(skip)]
    started: Option<Instant>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: JobState::Pending,
            history: vec![JobState::Pending],
            elapsed: Duration::ZERO,
            pend_time: Duration::ZERO,
            exit_code: None,
            submitted: Some(Instant::now()),
            started: None,
        }
    }

    /// Record a freshly polled state
    pub fn observe(&mut self, state: JobState) {
        self.observe_at(state, Instant::now());
    }

    /// Record a polled state as of `now`.
    ///
    /// Once the job is terminal further observations are ignored, so
    /// repeated polling never rewrites state or timings.
    pub fn observe_at(&mut self, state: JobState, now: Instant) {
        if self.state.is_terminal() {
            return;
        }

        if let Some(submitted) = self.submitted {
            let since_submit = now.saturating_duration_since(submitted);
            if state == JobState::Pending {
                self.pend_time = since_submit;
            } else if self.started.is_none() {
                self.pend_time = since_submit;
                self.started = Some(now);
            }
        }

        if let Some(started) = self.started {
            self.elapsed = now.saturating_duration_since(started);
        }

        if self.state != state {
            self.state = state;
            self.history.push(state);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("1234");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.history, vec![JobState::Pending]);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_pend_time_freezes_when_running() {
        let mut job = Job::new("42");
        let base = job.submitted.unwrap();

        job.observe_at(JobState::Pending, base + Duration::from_secs(5));
        assert_eq!(job.pend_time, Duration::from_secs(5));

        job.observe_at(JobState::Running, base + Duration::from_secs(8));
        assert_eq!(job.pend_time, Duration::from_secs(8));

        job.observe_at(JobState::Running, base + Duration::from_secs(20));
        assert_eq!(job.pend_time, Duration::from_secs(8));
        assert_eq!(job.elapsed, Duration::from_secs(12));
        assert_eq!(job.history, vec![JobState::Pending, JobState::Running]);
    }

    #[test]
    fn test_terminal_job_ignores_observations() {
        let mut job = Job::new("7");
        let base = job.submitted.unwrap();
        job.observe_at(JobState::Running, base + Duration::from_secs(1));
        job.observe_at(JobState::Complete, base + Duration::from_secs(3));
        let elapsed = job.elapsed;

        job.observe_at(JobState::Running, base + Duration::from_secs(30));
        assert_eq!(job.state, JobState::Complete);
        assert_eq!(job.elapsed, elapsed);
        assert_eq!(job.history.len(), 3);
    }

    #[test]
    fn test_job_state_serde() {
        let json = serde_json::to_string(&JobState::Suspended).unwrap();
        assert_eq!(json, "\"SUSPENDED\"");
    }
}
