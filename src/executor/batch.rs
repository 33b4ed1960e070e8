//! Batch scheduler back-ends: Slurm, LSF, PBS and Torque
//!
//! Each scheduler differs only in its command vocabulary and in the state
//! keywords it reports; the submit/poll/cancel flow lives in the parent
//! module.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{split_options, ExecutorError, Gathered, JobBackend, JobStatus};
use crate::config::BatchSettings;
use crate::models::{Builder, JobState};
use crate::utils::{CommandOutput, CommandSpec};

/// Supported batch schedulers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduler {
    Slurm,
    Lsf,
    Pbs,
    Torque,
}

impl Scheduler {
    pub fn backend(self, settings: &BatchSettings, timeout: Option<Duration>) -> BatchBackend<'_> {
        BatchBackend {
            scheduler: self,
            settings,
            timeout,
        }
    }

    /// Map a scheduler keyword onto the canonical job state
    pub fn map_state(self, keyword: &str) -> Option<JobState> {
        let state = match self {
            Scheduler::Slurm => match keyword {
                "PENDING" | "REQUEUED" | "CONFIGURING" => JobState::Pending,
                "RUNNING" | "COMPLETING" => JobState::Running,
                "SUSPENDED" | "STOPPED" => JobState::Suspended,
                "COMPLETED" | "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL"
                | "BOOT_FAIL" | "PREEMPTED" | "DEADLINE" => JobState::Complete,
                k if k.starts_with("CANCELLED") => JobState::Cancelled,
                _ => return None,
            },
            Scheduler::Lsf => match keyword {
                "PEND" | "WAIT" => JobState::Pending,
                "RUN" => JobState::Running,
                "PSUSP" | "USUSP" | "SSUSP" => JobState::Suspended,
                "DONE" | "EXIT" => JobState::Complete,
                _ => return None,
            },
            Scheduler::Pbs => match keyword {
                "Q" | "W" | "T" => JobState::Pending,
                "R" | "E" | "B" => JobState::Running,
                "H" | "U" | "S" => JobState::Suspended,
                "F" | "X" => JobState::Complete,
                _ => return None,
            },
            Scheduler::Torque => match keyword {
                "Q" | "W" | "T" => JobState::Pending,
                "R" | "E" => JobState::Running,
                "H" | "S" => JobState::Suspended,
                "C" => JobState::Complete,
                _ => return None,
            },
        };
        Some(state)
    }

    fn submit_program(self) -> &'static str {
        match self {
            Scheduler::Slurm => "sbatch",
            Scheduler::Lsf => "bsub",
            Scheduler::Pbs | Scheduler::Torque => "qsub",
        }
    }

    fn cancel_program(self) -> &'static str {
        match self {
            Scheduler::Slurm => "scancel",
            Scheduler::Lsf => "bkill",
            Scheduler::Pbs | Scheduler::Torque => "qdel",
        }
    }
}

/// A scheduler bound to one executor's settings
pub struct BatchBackend<'a> {
    scheduler: Scheduler,
    settings: &'a BatchSettings,
    timeout: Option<Duration>,
}

impl BatchBackend<'_> {
    fn cluster_arg(&self) -> Option<String> {
        self.settings
            .cluster
            .as_ref()
            .map(|c| format!("--clusters={c}"))
    }

    fn with_cluster(&self, spec: CommandSpec) -> CommandSpec {
        match (self.scheduler, self.cluster_arg()) {
            (Scheduler::Slurm, Some(arg)) => spec.arg(arg),
            _ => spec,
        }
    }
}

impl JobBackend for BatchBackend<'_> {
    fn submit_command(&self, builder: &Builder) -> CommandSpec {
        let s = self.settings;
        let stage = builder.stage_dir();
        let mut spec = CommandSpec::new(self.scheduler.submit_program())
            .current_dir(&stage)
            .timeout(self.timeout);

        match self.scheduler {
            Scheduler::Slurm => {
                spec = spec.arg("--parsable");
                if let Some(queue) = &s.queue {
                    spec = spec.arg("-p").arg(queue);
                }
                if let Some(qos) = &s.qos {
                    spec = spec.arg("-q").arg(qos);
                }
                if let Some(account) = &s.account {
                    spec = spec.arg(format!("--account={account}"));
                }
                if let Some(cluster) = self.cluster_arg() {
                    spec = spec.arg(cluster);
                }
                if let Some(n) = builder.numnodes {
                    spec = spec.arg("-N").arg(n.to_string());
                }
                if let Some(n) = builder.numprocs {
                    spec = spec.arg("-n").arg(n.to_string());
                }
                spec = spec
                    .arg("-J")
                    .arg(&builder.name)
                    .arg("-o")
                    .arg(path_arg(&builder.output_path()))
                    .arg("-e")
                    .arg(path_arg(&builder.error_path()));
                spec.args(split_options(&s.options))
                    .arg(path_arg(&builder.script))
            }
            Scheduler::Lsf => {
                if let Some(queue) = &s.queue {
                    spec = spec.arg("-q").arg(queue);
                }
                if let Some(account) = &s.account {
                    spec = spec.arg("-P").arg(account);
                }
                if let Some(n) = builder.numprocs {
                    spec = spec.arg("-n").arg(n.to_string());
                }
                if let Some(n) = builder.numnodes {
                    spec = spec.arg("-nnodes").arg(n.to_string());
                }
                spec = spec
                    .arg("-J")
                    .arg(&builder.name)
                    .arg("-o")
                    .arg(format!("{}.out", builder.name))
                    .arg("-e")
                    .arg(format!("{}.err", builder.name));
                spec.args(split_options(&s.options))
                    .stdin_file(&builder.script)
            }
            Scheduler::Pbs | Scheduler::Torque => {
                if let Some(queue) = &s.queue {
                    spec = spec.arg("-q").arg(queue);
                }
                if let Some(account) = &s.account {
                    spec = spec.arg("-P").arg(account);
                }
                if let Some(n) = builder.numprocs {
                    spec = spec.arg("-l").arg(format!("ncpus={n}"));
                }
                if let Some(n) = builder.numnodes {
                    spec = spec.arg("-l").arg(format!("nodes={n}"));
                }
                spec = spec
                    .arg("-N")
                    .arg(&builder.name)
                    .arg("-o")
                    .arg(path_arg(&builder.output_path()))
                    .arg("-e")
                    .arg(path_arg(&builder.error_path()));
                spec.args(split_options(&s.options))
                    .arg(path_arg(&builder.script))
            }
        }
    }

    fn parse_job_id(&self, output: &CommandOutput) -> Result<String, ExecutorError> {
        let invalid = || ExecutorError::InvalidJobId(output.stdout.trim().to_string());

        match self.scheduler {
            // `1234` or `1234;cluster`
            Scheduler::Slurm => {
                let line = output.lines().into_iter().last().ok_or_else(invalid)?;
                let id = line.split(';').next().unwrap_or_default().trim();
                if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                    Ok(id.to_string())
                } else {
                    Err(invalid())
                }
            }
            // `Job <1234> is submitted to queue <batch>.`
            Scheduler::Lsf => output
                .lines()
                .iter()
                .find_map(|line| {
                    let rest = line.split_once("Job <")?.1;
                    let id = rest.split_once('>')?.0;
                    id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
                })
                .filter(|id| !id.is_empty())
                .ok_or_else(invalid),
            // `157.pbsserver`
            Scheduler::Pbs | Scheduler::Torque => {
                let line = output.lines().into_iter().last().ok_or_else(invalid)?;
                let starts_numeric = line.chars().next().is_some_and(|c| c.is_ascii_digit());
                if starts_numeric && !line.contains(char::is_whitespace) {
                    Ok(line.to_string())
                } else {
                    Err(invalid())
                }
            }
        }
    }

    fn status_command(&self, job_id: &str) -> CommandSpec {
        match self.scheduler {
            Scheduler::Slurm => self.with_cluster(
                CommandSpec::new("sacct")
                    .args(["-j", job_id, "-o", "State", "-n", "-X", "-P"]),
            ),
            Scheduler::Lsf => {
                CommandSpec::new("bjobs").args(["-noheader", "-o", "stat", job_id])
            }
            Scheduler::Pbs => {
                CommandSpec::new("qstat").args(["-x", "-f", "-F", "json", job_id])
            }
            Scheduler::Torque => CommandSpec::new("qstat").args(["-f", job_id]),
        }
    }

    fn parse_status(
        &self,
        job_id: &str,
        output: &CommandOutput,
    ) -> Result<JobStatus, ExecutorError> {
        let (keyword, exit_code) = match self.scheduler {
            // `CANCELLED by 1001` keeps only the first word
            Scheduler::Slurm | Scheduler::Lsf => {
                let keyword = output
                    .lines()
                    .first()
                    .and_then(|l| l.split_whitespace().next())
                    .map(str::to_string);
                (keyword, None)
            }
            Scheduler::Pbs => {
                let attrs = pbs_attributes(job_id, &output.stdout)?;
                (
                    attrs.get("job_state").and_then(Value::as_str).map(str::to_string),
                    attrs.get("Exit_status").and_then(Value::as_i64).map(|c| c as i32),
                )
            }
            Scheduler::Torque => {
                let attrs = torque_attributes(&output.stdout);
                (
                    attrs.get("job_state").cloned(),
                    attrs.get("exit_status").and_then(|c| c.parse().ok()),
                )
            }
        };

        let keyword = keyword.ok_or_else(|| ExecutorError::PollFailed {
            job: job_id.to_string(),
            reason: "no state reported".to_string(),
        })?;
        let state = self
            .scheduler
            .map_state(&keyword)
            .ok_or_else(|| ExecutorError::UnknownJobState {
                job: job_id.to_string(),
                state: keyword.clone(),
            })?;

        Ok(JobStatus {
            state,
            keyword,
            exit_code,
        })
    }

    fn gather_command(&self, job_id: &str, _builder: &Builder) -> CommandSpec {
        match self.scheduler {
            Scheduler::Slurm => self.with_cluster(
                CommandSpec::new("sacct")
                    .args(["-j", job_id, "-X", "-n", "-P", "-o", "ExitCode,Workdir"]),
            ),
            Scheduler::Lsf => CommandSpec::new("bjobs").args([
                "-noheader",
                "-o",
                "exit_code output_file error_file",
                "-delimiter",
                "|",
                job_id,
            ]),
            Scheduler::Pbs | Scheduler::Torque => self.status_command(job_id),
        }
    }

    fn parse_gather(
        &self,
        output: &CommandOutput,
        builder: &Builder,
    ) -> Result<Gathered, ExecutorError> {
        let malformed = |what: &str| ExecutorError::PollFailed {
            job: builder
                .job
                .as_ref()
                .map(|j| j.id.clone())
                .unwrap_or_default(),
            reason: format!("malformed {what} output: {:?}", output.stdout.trim()),
        };

        match self.scheduler {
            // `2:0|/path/to/workdir`, exit code before the signal
            Scheduler::Slurm => {
                let line = output.lines().first().copied().ok_or_else(|| malformed("sacct"))?;
                let (code, workdir) = line.split_once('|').unwrap_or((line, ""));
                let exit_code = code
                    .split(':')
                    .next()
                    .and_then(|c| c.trim().parse::<i32>().ok())
                    .ok_or_else(|| malformed("sacct"))?;
                let dir = if workdir.trim().is_empty() {
                    builder.stage_dir()
                } else {
                    PathBuf::from(workdir.trim())
                };
                Ok(Gathered {
                    exit_code: Some(exit_code),
                    outfile: Some(dir.join(format!("{}.out", builder.name))),
                    errfile: Some(dir.join(format!("{}.err", builder.name))),
                    logs: None,
                })
            }
            // `-|hold_job.out|hold_job.err`, `-` when the job exited cleanly
            Scheduler::Lsf => {
                let line = output.lines().first().copied().ok_or_else(|| malformed("bjobs"))?;
                let fields: Vec<&str> = line.split('|').map(str::trim).collect();
                let &[code, out, err] = fields.as_slice() else {
                    return Err(malformed("bjobs"));
                };
                let exit_code = match code {
                    "-" | "" => 0,
                    c => c.parse().map_err(|_| malformed("bjobs"))?,
                };
                let stage = builder.stage_dir();
                Ok(Gathered {
                    exit_code: Some(exit_code),
                    outfile: Some(stage.join(out)),
                    errfile: Some(stage.join(err)),
                    logs: None,
                })
            }
            Scheduler::Pbs => {
                let job_id = builder.job.as_ref().map(|j| j.id.as_str()).unwrap_or_default();
                let attrs = pbs_attributes(job_id, &output.stdout)?;
                let path = |key: &str| attrs.get(key).and_then(Value::as_str).map(strip_host);
                Ok(Gathered {
                    exit_code: attrs
                        .get("Exit_status")
                        .and_then(Value::as_i64)
                        .map(|c| c as i32),
                    outfile: path("Output_Path"),
                    errfile: path("Error_Path"),
                    logs: None,
                })
            }
            Scheduler::Torque => {
                let attrs = torque_attributes(&output.stdout);
                Ok(Gathered {
                    exit_code: attrs.get("exit_status").and_then(|c| c.parse().ok()),
                    outfile: attrs.get("Output_Path").map(|p| strip_host(p)),
                    errfile: attrs.get("Error_Path").map(|p| strip_host(p)),
                    logs: None,
                })
            }
        }
    }

    fn cancel_command(&self, job_id: &str) -> CommandSpec {
        let spec = CommandSpec::new(self.scheduler.cancel_program()).arg(job_id);
        self.with_cluster(spec)
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// `host:/path/file.out` -> `/path/file.out`
fn strip_host(path: &str) -> PathBuf {
    match path.split_once(':') {
        Some((_, rest)) if rest.starts_with('/') => PathBuf::from(rest),
        _ => PathBuf::from(path),
    }
}

/// Attribute map of the single job in `qstat -f -F json` output
fn pbs_attributes(
    job_id: &str,
    stdout: &str,
) -> Result<serde_json::Map<String, Value>, ExecutorError> {
    let poll_failed = |reason: String| ExecutorError::PollFailed {
        job: job_id.to_string(),
        reason,
    };

    let doc: Value = serde_json::from_str(stdout)
        .map_err(|e| poll_failed(format!("invalid qstat json: {e}")))?;
    let jobs = doc
        .get("Jobs")
        .and_then(Value::as_object)
        .ok_or_else(|| poll_failed("qstat json has no Jobs".to_string()))?;

    jobs.get(job_id)
        .or_else(|| jobs.values().next())
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| poll_failed("job missing from qstat output".to_string()))
}

/// `key = value` lines of `qstat -f` text output
fn torque_attributes(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(" = "))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BatchSettings {
        BatchSettings {
            queue: Some("debug".to_string()),
            account: Some("proj1".to_string()),
            options: vec!["-C haswell".to_string()],
            ..Default::default()
        }
    }

    fn builder() -> Builder {
        Builder::new("hostname", "abc", "slurm.debug", "/scratch/hostname/run.sh")
            .with_resources(Some(4), Some(1))
    }

    fn out(stdout: &str) -> CommandOutput {
        CommandOutput::with_code(0, stdout)
    }

    #[test]
    fn test_state_tables() {
        use JobState::*;
        let cases = [
            (Scheduler::Slurm, "PENDING", Pending),
            (Scheduler::Slurm, "COMPLETING", Running),
            (Scheduler::Slurm, "TIMEOUT", Complete),
            (Scheduler::Slurm, "CANCELLED+", Cancelled),
            (Scheduler::Lsf, "PEND", Pending),
            (Scheduler::Lsf, "USUSP", Suspended),
            (Scheduler::Lsf, "EXIT", Complete),
            (Scheduler::Pbs, "B", Running),
            (Scheduler::Pbs, "X", Complete),
            (Scheduler::Torque, "C", Complete),
            (Scheduler::Torque, "H", Suspended),
        ];
        for (scheduler, keyword, expected) in cases {
            assert_eq!(scheduler.map_state(keyword), Some(expected), "{keyword}");
        }
        assert_eq!(Scheduler::Torque.map_state("B"), None);
        assert_eq!(Scheduler::Lsf.map_state("ZOMBI"), None);
    }

    #[test]
    fn test_slurm_submit_command() {
        let s = settings();
        let spec = Scheduler::Slurm.backend(&s, None).submit_command(&builder());
        assert_eq!(spec.program, "sbatch");
        assert_eq!(spec.cwd.as_deref(), Some(Path::new("/scratch/hostname")));
        let line = spec.display();
        assert!(line.starts_with("sbatch --parsable -p debug --account=proj1"));
        assert!(line.contains("-N 1 -n 4"));
        assert!(line.ends_with("-C haswell /scratch/hostname/run.sh"));
    }

    #[test]
    fn test_lsf_submit_reads_script_from_stdin() {
        let s = settings();
        let spec = Scheduler::Lsf.backend(&s, None).submit_command(&builder());
        assert_eq!(spec.program, "bsub");
        assert_eq!(spec.stdin.as_deref(), Some(Path::new("/scratch/hostname/run.sh")));
        assert!(spec.display().ends_with("< /scratch/hostname/run.sh"));
    }

    #[test]
    fn test_parse_job_ids() {
        let s = settings();
        let slurm = Scheduler::Slurm.backend(&s, None);
        assert_eq!(slurm.parse_job_id(&out("1234\n")).unwrap(), "1234");
        assert_eq!(slurm.parse_job_id(&out("1234;cori\n")).unwrap(), "1234");
        assert!(slurm.parse_job_id(&out("")).is_err());
        assert!(slurm.parse_job_id(&out("error")).is_err());

        let lsf = Scheduler::Lsf.backend(&s, None);
        let id = lsf
            .parse_job_id(&out("Job <9876> is submitted to queue <batch>.\n"))
            .unwrap();
        assert_eq!(id, "9876");
        assert!(matches!(
            lsf.parse_job_id(&out("Request aborted")),
            Err(ExecutorError::InvalidJobId(_))
        ));

        let pbs = Scheduler::Pbs.backend(&s, None);
        assert_eq!(pbs.parse_job_id(&out("157.pbs\n")).unwrap(), "157.pbs");
        assert!(pbs.parse_job_id(&out("qsub: Unknown queue")).is_err());
    }

    #[test]
    fn test_slurm_status_and_cluster() {
        let s = BatchSettings {
            cluster: Some("escori".to_string()),
            ..Default::default()
        };
        let backend = Scheduler::Slurm.backend(&s, None);
        assert!(backend.status_command("5").display().ends_with("--clusters=escori"));
        assert_eq!(backend.cancel_command("5").display(), "scancel 5 --clusters=escori");

        let status = backend.parse_status("5", &out("CANCELLED by 1001\n")).unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.keyword, "CANCELLED");
    }

    #[test]
    fn test_unknown_keyword_is_error() {
        let s = settings();
        let backend = Scheduler::Slurm.backend(&s, None);
        assert!(matches!(
            backend.parse_status("5", &out("SPECIAL_EXIT")),
            Err(ExecutorError::UnknownJobState { .. })
        ));
        assert!(matches!(
            backend.parse_status("5", &out("")),
            Err(ExecutorError::PollFailed { .. })
        ));
    }

    #[test]
    fn test_lsf_gather() {
        let s = settings();
        let backend = Scheduler::Lsf.backend(&s, None);
        let b = builder();

        let g = backend.parse_gather(&out("-|hostname.out|hostname.err\n"), &b).unwrap();
        assert_eq!(g.exit_code, Some(0));
        assert_eq!(g.outfile, Some(PathBuf::from("/scratch/hostname/hostname.out")));

        let g = backend.parse_gather(&out("3|a.out|a.err"), &b).unwrap();
        assert_eq!(g.exit_code, Some(3));
    }

    #[test]
    fn test_pbs_status_json() {
        let json = r#"{
            "timestamp": 1,
            "Jobs": {
                "157.pbs": {
                    "job_state": "F",
                    "Exit_status": 1,
                    "Output_Path": "pbs:/home/user/hostname.o157",
                    "Error_Path": "pbs:/home/user/hostname.e157"
                }
            }
        }"#;
        let s = settings();
        let backend = Scheduler::Pbs.backend(&s, None);
        let status = backend.parse_status("157.pbs", &out(json)).unwrap();
        assert_eq!(status.state, JobState::Complete);
        assert_eq!(status.exit_code, Some(1));

        let mut b = builder();
        b.job = Some(crate::models::Job::new("157.pbs"));
        let g = backend.parse_gather(&out(json), &b).unwrap();
        assert_eq!(g.outfile, Some(PathBuf::from("/home/user/hostname.o157")));
        assert_eq!(g.errfile, Some(PathBuf::from("/home/user/hostname.e157")));
    }

    #[test]
    fn test_torque_status_text() {
        let text = "Job Id: 12.torque\n    job_state = C\n    exit_status = 0\n    Output_Path = node1:/home/u/t.out\n";
        let s = settings();
        let backend = Scheduler::Torque.backend(&s, None);
        let status = backend.parse_status("12.torque", &out(text)).unwrap();
        assert_eq!(status.state, JobState::Complete);
        assert_eq!(status.exit_code, Some(0));
        let g = backend.parse_gather(&out(text), &builder()).unwrap();
        assert_eq!(g.outfile, Some(PathBuf::from("/home/u/t.out")));
    }

    #[test]
    fn test_strip_host() {
        assert_eq!(strip_host("login1:/a/b.out"), PathBuf::from("/a/b.out"));
        assert_eq!(strip_host("/a/b.out"), PathBuf::from("/a/b.out"));
    }
}
