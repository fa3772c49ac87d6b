//  STATUS.rs
//    by Lut99
//
//  Created:
//    11 Mar 2024, 09:48:02
//  Last edited:
//    19 Nov 2024, 10:31:26
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the execution statuses that jobs report throughout the
//!   framework, together with parsers to read them back from persisted
//!   state.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Defines the error that may occur when parsing execution statuses.
#[derive(Debug)]
pub enum ExecutionStatusError {
    /// Could not deserialize the given string
    UnknownStatus{ raw: String },
}

impl Display for ExecutionStatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecutionStatusError::*;
        match self {
            UnknownStatus{ raw } => write!(f, "Unknown execution status '{}'", raw),
        }
    }
}

impl Error for ExecutionStatusError {}





/***** LIBRARY *****/
/// The states a unit of execution can be in, whether it runs as a local
/// process or as a job owned by a batch scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The task has been created but nothing has been handed to a scheduler (or spawned) yet.
    Unsubmitted,
    /// The task is known to a scheduler but waiting to start.
    Pending,
    /// The task is currently executing.
    Running,
    /// The task finished successfully.
    Completed,
    /// The task was cancelled before completion.
    Cancelled,
    /// The task finished unsuccessfully.
    Failed,
    /// The task is on hold pending release by the scheduler.
    Held,
    /// The task is winding down but not fully completed.
    Ending,
    /// The task state could not be determined.
    Unknown,
}

impl ExecutionStatus {
    /// Returns whether this status is terminal, i.e., whether the task can never leave it again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Returns whether the task has been handed to a scheduler or spawned at all.
    #[inline]
    pub fn is_submitted(&self) -> bool {
        !matches!(self, Self::Unsubmitted)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecutionStatus::*;
        match self {
            Unsubmitted => write!(f, "unsubmitted"),
            Pending     => write!(f, "pending"),
            Running     => write!(f, "running"),
            Completed   => write!(f, "completed"),
            Cancelled   => write!(f, "cancelled"),
            Failed      => write!(f, "failed"),
            Held        => write!(f, "held"),
            Ending      => write!(f, "ending"),
            Unknown     => write!(f, "unknown"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = ExecutionStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unsubmitted" => Ok(Self::Unsubmitted),
            "pending"     => Ok(Self::Pending),
            "running"     => Ok(Self::Running),
            "completed"   => Ok(Self::Completed),
            "cancelled"   => Ok(Self::Cancelled),
            "failed"      => Ok(Self::Failed),
            "held"        => Ok(Self::Held),
            "ending"      => Ok(Self::Ending),
            "unknown"     => Ok(Self::Unknown),

            raw => Err(ExecutionStatusError::UnknownStatus{ raw: raw.into() }),
        }
    }
}



/// The per-step outcome recorded by the orchestrator. Mostly mirrors
/// [`ExecutionStatus`], except that a step may also be skipped when one of
/// its dependencies failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The step has not been handed to an execution handler yet.
    Unsubmitted,
    /// The step's job is waiting in a scheduler queue.
    Pending,
    /// The step's job is executing.
    Running,
    /// The step's job finished successfully.
    Completed,
    /// The step's job was cancelled.
    Cancelled,
    /// The step's job finished unsuccessfully.
    Failed,
    /// The step was never submitted because a dependency failed or was cancelled.
    Skipped,
}

impl StepStatus {
    /// Returns whether this status is terminal for scheduling purposes.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed | Self::Skipped)
    }
}

impl From<ExecutionStatus> for StepStatus {
    fn from(value: ExecutionStatus) -> Self {
        use ExecutionStatus::*;
        match value {
            Unsubmitted                        => Self::Unsubmitted,
            Pending | Held                     => Self::Pending,
            Running | Ending | Unknown         => Self::Running,
            Completed                          => Self::Completed,
            Cancelled                          => Self::Cancelled,
            Failed                             => Self::Failed,
        }
    }
}

impl Display for StepStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use StepStatus::*;
        match self {
            Unsubmitted => write!(f, "unsubmitted"),
            Pending     => write!(f, "pending"),
            Running     => write!(f, "running"),
            Completed   => write!(f, "completed"),
            Cancelled   => write!(f, "cancelled"),
            Failed      => write!(f, "failed"),
            Skipped     => write!(f, "skipped"),
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            ExecutionStatus::Unsubmitted,
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Failed,
            ExecutionStatus::Held,
            ExecutionStatus::Ending,
            ExecutionStatus::Unknown,
        ] {
            assert_eq!(ExecutionStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Held.is_terminal());
        assert!(!ExecutionStatus::Ending.is_terminal());
    }

    #[test]
    fn step_status_absorbs_transients() {
        assert_eq!(StepStatus::from(ExecutionStatus::Held), StepStatus::Pending);
        assert_eq!(StepStatus::from(ExecutionStatus::Ending), StepStatus::Running);
        assert_eq!(StepStatus::from(ExecutionStatus::Unknown), StepStatus::Running);
    }
}
