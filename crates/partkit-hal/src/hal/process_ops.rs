//! Process execution helpers.
//!
//! External commands are considered "world-touching" and must go through the HAL so we can
//! test layouts without spawning real processes.

use crate::HalResult;
use std::time::Duration;

/// Default upper bound for commands that do not pick their own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Process execution trait (external command runner).
pub trait ProcessOps {
    /// Run `program` and return its combined stdout and stderr.
    ///
    /// A non-zero exit status is reported as [`crate::HalError::CommandFailed`] with the
    /// combined output attached.
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<String>;

    /// Like [`ProcessOps::command_output`], with `input` written to the command's stdin.
    ///
    /// Used for secrets such as passphrases that must not appear in the argument list.
    fn command_output_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
        timeout: Duration,
    ) -> HalResult<String>;

    fn run(&self, program: &str, args: &[&str]) -> HalResult<String> {
        self.command_output(program, args, DEFAULT_TIMEOUT)
    }
}
