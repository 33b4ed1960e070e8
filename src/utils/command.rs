//! External command invocation
//!
//! Every interaction with a back-end (test shell, scheduler CLI, container
//! runtime) is a local process launched through a [`CommandRunner`].

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Command invocation errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open stdin file {path}: {source}")]
    Stdin {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting on '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A command line to execute
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Feed the given file on stdin (`cmd < file`)
    pub fn stdin_file(mut self, path: impl AsRef<Path>) -> Self {
        self.stdin = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render as a shell-like command line for logs and reports
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{arg}'"));
            } else {
                line.push_str(arg);
            }
        }
        if let Some(stdin) = &self.stdin {
            line.push_str(&format!(" < {}", stdin.display()));
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal or on timeout
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn returncode(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    /// Non-empty stdout lines, trimmed
    pub fn lines(&self) -> Vec<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// Launches commands and collects their output
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<CommandOutput, CommandError>>;
}

/// Runs commands as real child processes
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    async fn execute(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let command_line = spec.display();
        debug!("Running command: {}", command_line);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        match &spec.stdin {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|source| CommandError::Stdin {
                    path: path.clone(),
                    source,
                })?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let waited = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    // Dropping the future drops the child, which kills it
                    warn!(
                        "Command '{}' exceeded timeout of {}s and was killed",
                        command_line,
                        limit.as_secs()
                    );
                    return Ok(CommandOutput {
                        code: None,
                        stdout: String::new(),
                        stderr: format!("killed after {}s timeout", limit.as_secs()),
                        timed_out: true,
                    });
                }
            },
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|source| CommandError::Io {
            command: command_line.clone(),
            source,
        })?;

        debug!(
            "Command '{}' exited with {:?}",
            command_line,
            output.status.code()
        );

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        })
    }
}

impl CommandRunner for ProcessRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<CommandOutput, CommandError>> {
        Box::pin(Self::execute(spec))
    }
}

#[cfg(test)]
impl CommandOutput {
    pub fn with_code(code: i32, stdout: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}
