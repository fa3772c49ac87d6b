//  ERRORS.rs
//    by Lut99
//
//  Created:
//    16 Apr 2024, 09:04:27
//  Last edited:
//    12 Dec 2024, 09:40:18
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `cstar-plr` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Errors that relate to building and checking the step graph.
#[derive(Debug)]
pub enum PlanError {
    /// The step graph contains a cycle.
    Cycle{ workplan: String, steps: Vec<String> },
    /// The workplan itself is structurally invalid.
    WorkplanError{ err: specifications::workplan::WorkplanError },
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use PlanError::*;
        match self {
            Cycle{ workplan, steps } => write!(f, "Step graph of workplan '{}' contains a cycle through: {}", workplan, steps.join(", ")),
            WorkplanError{ err }     => write!(f, "{}", err),
        }
    }
}

impl Error for PlanError {}



/// Errors that relate to the run-ID-keyed job record and its lockfile.
#[derive(Debug)]
pub enum RecordError {
    /// Failed to create the run directory.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to read the record file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the record file.
    FileParseError{ path: PathBuf, err: serde_json::Error },
    /// Failed to serialize the record.
    SerializeError{ err: serde_json::Error },
    /// Failed to write the record atomically.
    FileWriteError{ path: PathBuf, err: std::io::Error },

    /// The stored digest disagrees with the workplan being run.
    RunIdConflict{ run_id: String, stored: String, computed: String },
    /// Another live process owns this run-ID.
    Locked{ run_id: String, pid: u32, path: PathBuf },
    /// Failed to create or remove the lockfile.
    LockError{ path: PathBuf, err: std::io::Error },
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use RecordError::*;
        match self {
            DirCreateError{ path, err } => write!(f, "Failed to create run directory '{}': {}", path.display(), err),
            FileReadError{ path, err }  => write!(f, "Failed to read job record '{}': {}", path.display(), err),
            FileParseError{ path, err } => write!(f, "Failed to parse job record '{}': {}", path.display(), err),
            SerializeError{ err }       => write!(f, "Failed to serialize job record: {}", err),
            FileWriteError{ path, err } => write!(f, "Failed to write job record '{}': {}", path.display(), err),

            RunIdConflict{ run_id, stored, computed } => write!(f, "Run-ID '{}' belongs to a different workplan (stored digest {}, this workplan digests to {}); pass --force to override", run_id, stored, computed),
            Locked{ run_id, pid, path } => write!(f, "Run-ID '{}' is owned by live process {} (lockfile '{}')", run_id, pid, path.display()),
            LockError{ path, err }      => write!(f, "Failed to manage lockfile '{}': {}", path.display(), err),
        }
    }
}

impl Error for RecordError {}



/// Errors that relate to actually orchestrating a workplan.
#[derive(Debug)]
pub enum OrchestrateError {
    /// Planning failed (cycle, bad workplan).
    PlanError{ err: PlanError },
    /// The record layer failed.
    RecordError{ err: RecordError },
    /// The time-splitting transform failed.
    TransformError{ err: TransformError },
    /// A step's blueprint could not be loaded.
    BlueprintError{ step: String, err: specifications::blueprint::BlueprintError },
    /// A step's blueprint could not be fetched from its URL.
    BlueprintFetchError{ step: String, err: cstar_tsk::errors::RetrieveError },
    /// A step's blueprint override has the wrong shape.
    IllegalOverride{ step: String, key: String, reason: String },
    /// A step's simulation failed somewhere in its lifecycle.
    SimulationError{ run_id: String, step: String, err: cstar_sim::errors::SimulationError },
    /// A step's handler failed.
    ExecuteError{ run_id: String, step: String, err: cstar_exe::errors::ExecuteError },
}

impl Display for OrchestrateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use OrchestrateError::*;
        match self {
            PlanError{ err }   => write!(f, "{}", err),
            RecordError{ err } => write!(f, "{}", err),
            TransformError{ err } => write!(f, "{}", err),
            BlueprintError{ step, err } => write!(f, "Failed to load blueprint of step '{}': {}", step, err),
            BlueprintFetchError{ step, err } => write!(f, "Failed to fetch blueprint of step '{}': {}", step, err),
            IllegalOverride{ step, key, reason } => write!(f, "Illegal blueprint override '{}' on step '{}': {}", key, step, reason),
            SimulationError{ run_id, step, err } => write!(f, "Step '{}' of run '{}' failed: {}", step, run_id, err),
            ExecuteError{ run_id, step, err }    => write!(f, "Step '{}' of run '{}' failed: {}", step, run_id, err),
        }
    }
}

impl Error for OrchestrateError {}

impl From<PlanError> for OrchestrateError {
    #[inline]
    fn from(err: PlanError) -> Self { Self::PlanError{ err } }
}
impl From<RecordError> for OrchestrateError {
    #[inline]
    fn from(err: RecordError) -> Self { Self::RecordError{ err } }
}
impl From<TransformError> for OrchestrateError {
    #[inline]
    fn from(err: TransformError) -> Self { Self::TransformError{ err } }
}



/// Errors that relate to the time-splitting transform.
#[derive(Debug)]
pub enum TransformError {
    /// The frequency string is not one of `monthly`, `weekly`, `daily`.
    UnknownFrequency{ raw: String },
    /// The blueprint to split could not be handled.
    BlueprintError{ err: specifications::blueprint::BlueprintError },
    /// Failed to write a derived blueprint.
    WriteError{ path: PathBuf, err: specifications::blueprint::BlueprintError },
    /// Failed to create the directory for derived blueprints.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// The named step does not exist in the workplan.
    UnknownStep{ workplan: String, step: String },
}

impl Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use TransformError::*;
        match self {
            UnknownFrequency{ raw } => write!(f, "Unknown transform frequency '{}' (expected 'monthly', 'weekly' or 'daily')", raw),
            BlueprintError{ err }   => write!(f, "{}", err),
            WriteError{ path, err } => write!(f, "Failed to write derived blueprint '{}': {}", path.display(), err),
            DirCreateError{ path, err } => write!(f, "Failed to create directory '{}': {}", path.display(), err),
            UnknownStep{ workplan, step } => write!(f, "Workplan '{}' has no step '{}'", workplan, step),
        }
    }
}

impl Error for TransformError {}
