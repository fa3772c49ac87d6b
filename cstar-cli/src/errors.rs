//  ERRORS.rs
//    by Lut99
//
//  Created:
//    23 Apr 2024, 10:20:36
//  Last edited:
//    12 Dec 2024, 13:02:58
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the top-level CLI error and its mapping to exit codes: 0 for
//!   success, 1 for runtime failure, 2 for validation failure, 3 for
//!   configuration trouble.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;

use cstar_exe::errors::ExecuteError;
use cstar_plr::errors::{OrchestrateError, RecordError};


/***** CONSTANTS *****/
/// Exit code for runtime failures.
pub const EXIT_RUNTIME: i32 = 1;
/// Exit code for validation failures.
pub const EXIT_VALIDATION: i32 = 2;
/// Exit code for configuration failures.
pub const EXIT_CONFIGURATION: i32 = 3;





/***** LIBRARY *****/
/// The top-level error of the `cstar` binary.
#[derive(Debug)]
pub enum CliError {
    /// A blueprint failed to load or validate.
    BlueprintError{ err: specifications::blueprint::BlueprintError },
    /// A workplan failed to load or validate.
    WorkplanError{ err: specifications::workplan::WorkplanError },
    /// The step graph is not a DAG.
    PlanError{ err: cstar_plr::errors::PlanError },
    /// The orchestrator failed.
    OrchestrateError{ err: OrchestrateError },
    /// A simulation failed outside a workplan.
    SimulationError{ err: cstar_sim::errors::SimulationError },
    /// A standalone handler operation failed.
    ExecuteError{ err: ExecuteError },
    /// The host could not be classified.
    SystemError{ err: cstar_cfg::errors::SystemError },
    /// The environment store broke.
    StoreError{ err: cstar_cfg::errors::EnvStoreError },
    /// No run-ID was given and `$CSTAR_RUNID` is unset.
    MissingRunId,
    /// The run finished, but not every step completed.
    StepsNotCompleted{ run_id: String },
    /// The requested run-ID has no record on disk.
    NoSuchRun{ run_id: String, path: PathBuf },
    /// A working directory exists and clobbering is not allowed.
    DirectoryExists{ path: PathBuf },
    /// A working directory holds a live job record and may not be clobbered.
    DirectoryLive{ path: PathBuf },
    /// Failed to remove a working directory that may be clobbered.
    ClobberError{ path: PathBuf, err: std::io::Error },
}

impl CliError {
    /// Maps this error to the exit code contract of the binary.
    pub fn exit_code(&self) -> i32 {
        use CliError::*;
        match self {
            BlueprintError{ .. } | WorkplanError{ .. } | PlanError{ .. } => EXIT_VALIDATION,

            SystemError{ .. } | StoreError{ .. } | MissingRunId => EXIT_CONFIGURATION,
            ExecuteError{ err: cstar_exe::errors::ExecuteError::ConfigError{ .. } } => EXIT_CONFIGURATION,

            OrchestrateError{ err } => match err {
                cstar_plr::errors::OrchestrateError::PlanError{ .. }                                       => EXIT_VALIDATION,
                cstar_plr::errors::OrchestrateError::BlueprintError{ .. }                                  => EXIT_VALIDATION,
                cstar_plr::errors::OrchestrateError::IllegalOverride{ .. }                                 => EXIT_VALIDATION,
                cstar_plr::errors::OrchestrateError::RecordError{ err: RecordError::RunIdConflict{ .. } }  => EXIT_RUNTIME,
                cstar_plr::errors::OrchestrateError::SimulationError{ err, .. } if is_config_sim_error(err) => EXIT_CONFIGURATION,
                _                                                                                          => EXIT_RUNTIME,
            },
            SimulationError{ err } if is_config_sim_error(err) => EXIT_CONFIGURATION,
            SimulationError{ err } if is_validation_sim_error(err) => EXIT_VALIDATION,

            _ => EXIT_RUNTIME,
        }
    }
}

/// Returns whether a simulation error is, at heart, missing configuration.
fn is_config_sim_error(err: &cstar_sim::errors::SimulationError) -> bool {
    matches!(
        err,
        cstar_sim::errors::SimulationError::ExecuteError{ err: ExecuteError::ConfigError{ .. }, .. }
            | cstar_sim::errors::SimulationError::StoreError{ .. },
    )
}

/// Returns whether a simulation error is a validation failure.
fn is_validation_sim_error(err: &cstar_sim::errors::SimulationError) -> bool {
    matches!(
        err,
        cstar_sim::errors::SimulationError::DateOutOfRange{ .. }
            | cstar_sim::errors::SimulationError::InvertedDates{ .. }
            | cstar_sim::errors::SimulationError::NoRomsComponent{ .. },
    )
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use CliError::*;
        match self {
            BlueprintError{ err }   => write!(f, "{}", err),
            WorkplanError{ err }    => write!(f, "{}", err),
            PlanError{ err }        => write!(f, "{}", err),
            OrchestrateError{ err } => write!(f, "{}", err),
            SimulationError{ err }  => write!(f, "{}", err),
            ExecuteError{ err }     => write!(f, "{}", err),
            SystemError{ err }      => write!(f, "{}", err),
            StoreError{ err }       => write!(f, "{}", err),
            MissingRunId            => write!(f, "No run-ID given; pass --run-id or set $CSTAR_RUNID"),
            StepsNotCompleted{ run_id } => write!(f, "Run '{}' finished, but not every step completed; see `cstar workplan status --run-id {}`", run_id, run_id),
            NoSuchRun{ run_id, path } => write!(f, "No job record for run-ID '{}' (looked at '{}')", run_id, path.display()),
            DirectoryExists{ path } => write!(f, "Working directory '{}' already exists; set CSTAR_CLOBBER_WORKING_DIR=1 to overwrite it", path.display()),
            DirectoryLive{ path }   => write!(f, "Working directory '{}' holds a job record with a live owner; refusing to clobber it", path.display()),
            ClobberError{ path, err } => write!(f, "Failed to remove working directory '{}': {}", path.display(), err),
        }
    }
}

impl Error for CliError {}
