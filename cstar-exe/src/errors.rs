//  ERRORS.rs
//    by Lut99
//
//  Created:
//    02 Apr 2024, 10:24:41
//  Last edited:
//    09 Dec 2024, 17:12:03
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `cstar-exe` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::process::ExitStatus;


/***** LIBRARY *****/
/// Errors that relate to resolving what to submit where. These surface at
/// submission time, never at startup.
#[derive(Debug)]
pub enum SubmitConfigError {
    /// No account was passed and the fallback variable is unset.
    MissingAccount{ var: &'static str },
    /// The requested queue is not known on this system.
    UnknownQueue{ system: String, queue: String },
    /// The requested walltime exceeds the queue's maximum.
    WalltimeExceedsMax{ queue: String, walltime: String, max: String },
    /// A walltime string could not be parsed.
    IllegalWalltime{ err: cstar_cfg::errors::SystemError },
    /// The scheduler requires a node layout but none can be derived.
    NoNodeDistribution{ system: String, n_ranks: u32 },
}

impl Display for SubmitConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use SubmitConfigError::*;
        match self {
            MissingAccount{ var }            => write!(f, "No account key given and ${} is unset; set it or pass one explicitly", var),
            UnknownQueue{ system, queue }    => write!(f, "Queue '{}' is not known on system '{}'", queue, system),
            WalltimeExceedsMax{ queue, walltime, max } => write!(f, "Requested walltime {} exceeds the maximum {} of queue '{}'", walltime, max, queue),
            IllegalWalltime{ err }           => write!(f, "{}", err),
            NoNodeDistribution{ system, n_ranks } => write!(f, "System '{}' requires an explicit node layout but none can be derived for {} ranks", system, n_ranks),
        }
    }
}

impl Error for SubmitConfigError {}



/// Errors that relate to driving jobs: launching, submitting, querying and
/// cancelling them.
#[derive(Debug)]
pub enum ExecuteError {
    /// Failed to create the output directory of a job.
    OutputDirError{ path: PathBuf, err: std::io::Error },
    /// Failed to open the output file of a job.
    OutputOpenError{ path: PathBuf, err: std::io::Error },
    /// Failed to write the submission script.
    ScriptWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to spawn a local subprocess.
    SpawnError{ command: String, err: std::io::Error },
    /// There is no local subprocess to wait for or cancel.
    NotStarted,
    /// Failed to kill a local subprocess.
    KillError{ err: std::io::Error },
    /// Failed to poll a local subprocess.
    PollError{ err: std::io::Error },

    /// A scheduler command kept failing after all retries.
    SchedulerError{ command: String, stderr: String },
    /// A scheduler command could not be launched at all.
    SchedulerLaunchError{ command: String, err: std::io::Error },
    /// A scheduler command ran but its answer made no sense.
    SchedulerParseError{ command: String, output: String, reason: String },
    /// The scheduler's cancel command failed.
    CancelError{ id: String, command: String, status: ExitStatus, stderr: String },

    /// The submission requires configuration that is missing or illegal.
    ConfigError{ err: SubmitConfigError },
}

impl Display for ExecuteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecuteError::*;
        match self {
            OutputDirError{ path, err }   => write!(f, "Failed to create output directory '{}': {}", path.display(), err),
            OutputOpenError{ path, err }  => write!(f, "Failed to open output file '{}': {}", path.display(), err),
            ScriptWriteError{ path, err } => write!(f, "Failed to write submission script '{}': {}", path.display(), err),
            SpawnError{ command, err }    => write!(f, "Failed to spawn local process '{}': {}", command, err),
            NotStarted                    => write!(f, "Process has not been started"),
            KillError{ err }              => write!(f, "Failed to kill local process: {}", err),
            PollError{ err }              => write!(f, "Failed to poll local process: {}", err),

            SchedulerError{ command, stderr }      => write!(f, "Scheduler command '{}' kept failing; last stderr:\n{}", command, stderr),
            SchedulerLaunchError{ command, err }   => write!(f, "Failed to launch scheduler command '{}': {}", command, err),
            SchedulerParseError{ command, output, reason } => write!(f, "Cannot make sense of output of '{}' ({}): {}", command, reason, output),
            CancelError{ id, command, status, stderr } => write!(f, "Failed to cancel job {} with '{}' (exit code {}): {}", id, command, status.code().unwrap_or(-1), stderr),

            ConfigError{ err } => write!(f, "{}", err),
        }
    }
}

impl Error for ExecuteError {}

impl From<SubmitConfigError> for ExecuteError {
    #[inline]
    fn from(err: SubmitConfigError) -> Self {
        Self::ConfigError{ err }
    }
}
