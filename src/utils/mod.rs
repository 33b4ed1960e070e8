//! Shared utilities: process invocation, logging and timing

pub mod command;
pub mod logger;
pub mod timer;

pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use logger::{init_logger, LogLevel};
pub use timer::{Timer, WaveClock};
