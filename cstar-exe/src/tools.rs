//  TOOLS.rs
//    by Lut99
//
//  Created:
//    02 Apr 2024, 11:01:13
//  Last edited:
//    21 Nov 2024, 17:02:44
//  Auto updated?
//    Yes
//
//  Description:
//!   Small helpers for talking to batch schedulers: running their command
//!   line tools with the retry policy transient failures deserve.
//

use std::process::{Command, Output};
use std::time::Duration;

use log::warn;

use crate::errors::ExecuteError as Error;


/***** CONSTANTS *****/
/// How often a scheduler command is attempted in total.
pub const N_ATTEMPTS: u32 = 3;





/***** LIBRARY *****/
/// Runs the given scheduler command, retrying transient failures with
/// exponential backoff (1s, 2s, 4s).
///
/// A command that cannot be launched at all (binary missing) is not retried.
/// A command that keeps exiting non-zero surfaces as
/// [`Error::SchedulerError`] carrying the raw stderr of the last attempt.
///
/// # Returns
/// The trimmed stdout of the first successful attempt.
pub fn run_scheduler_cmd(cmd: &mut Command) -> Result<String, Error> {
    let pretty: String = format!("{:?}", cmd).replace('"', "");

    let mut last_stderr: String = String::new();
    for attempt in 0..N_ATTEMPTS {
        if attempt > 0 {
            let delay: Duration = Duration::from_secs(1 << (attempt - 1));
            warn!("Scheduler command '{}' failed (attempt {}/{}); retrying in {}s", pretty, attempt, N_ATTEMPTS, delay.as_secs());
            std::thread::sleep(delay);
        }

        let output: Output = match cmd.output() {
            Ok(output) => output,
            Err(err)   => { return Err(Error::SchedulerLaunchError{ command: pretty, err }); },
        };
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        last_stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    }

    Err(Error::SchedulerError{ command: pretty, stderr: last_stderr })
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_returns_stdout() {
        let mut cmd = Command::new("echo");
        cmd.arg("Submitted batch job 123456");
        assert_eq!(run_scheduler_cmd(&mut cmd).unwrap(), "Submitted batch job 123456");
    }

    #[test]
    fn missing_binary_is_not_retried() {
        let mut cmd = Command::new("definitely-not-a-scheduler-tool");
        assert!(matches!(run_scheduler_cmd(&mut cmd), Err(Error::SchedulerLaunchError{ .. })));
    }

    #[test]
    fn persistent_failure_carries_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken pipe >&2; exit 1"]);
        match run_scheduler_cmd(&mut cmd) {
            Err(Error::SchedulerError{ stderr, .. }) => assert!(stderr.contains("broken pipe")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
