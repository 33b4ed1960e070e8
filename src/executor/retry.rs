//! Retry of failed local runs

use std::future::Future;
use tracing::{debug, warn};

use crate::utils::{CommandError, CommandOutput};

/// Final attempt's output plus the return code of every attempt
#[derive(Clone, Debug)]
pub struct RetryOutcome {
    pub output: CommandOutput,
    pub returncodes: Vec<i32>,
}

/// Re-runs a command up to `retries` extra times until it exits zero
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryController {
    retries: u32,
}

impl RetryController {
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Run `attempt` until it succeeds or attempts are exhausted.
    ///
    /// A launch error ends the loop immediately.
    pub async fn run<F, Fut>(&self, label: &str, mut attempt: F) -> Result<RetryOutcome, CommandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CommandOutput, CommandError>>,
    {
        let max = self.max_attempts();
        let mut returncodes = Vec::new();
        let mut n = 1;

        loop {
            let output = attempt().await?;
            let code = output.returncode();
            returncodes.push(code);

            if output.is_success() || n >= max {
                return Ok(RetryOutcome {
                    output,
                    returncodes,
                });
            }

            warn!("{}: attempt {}/{} returned {}, retrying", label, n, max, code);
            n += 1;
            debug!("{}: starting attempt {}", label, n);
        }
    }
}
