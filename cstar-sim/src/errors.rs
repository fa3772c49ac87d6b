//  ERRORS.rs
//    by Lut99
//
//  Created:
//    09 Apr 2024, 08:52:10
//  Last edited:
//    11 Dec 2024, 17:23:31
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `cstar-sim` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::process::ExitStatus;


/***** LIBRARY *****/
/// Errors that relate to the runtime-settings file.
#[derive(Debug)]
pub enum SettingsError {
    /// Failed to read the given file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to write the given file.
    FileWriteError{ path: PathBuf, err: std::io::Error },
    /// The named section does not exist.
    UnknownSection{ key: String },
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use SettingsError::*;
        match self {
            FileReadError{ path, err }  => write!(f, "Failed to read runtime settings file '{}': {}", path.display(), err),
            FileWriteError{ path, err } => write!(f, "Failed to write runtime settings file '{}': {}", path.display(), err),
            UnknownSection{ key }       => write!(f, "Runtime settings have no section '{}'", key),
        }
    }
}

impl Error for SettingsError {}



/// Errors that relate to joining partitioned output files.
#[derive(Debug)]
pub enum JoinError {
    /// Failed to list the output directory.
    DirReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to launch the join tool.
    JoinLaunchError{ command: String, err: std::io::Error },
    /// The join tool failed for one group of files.
    JoinFailure{ prefix: String, status: ExitStatus, log: String },
    /// Failed to delete a partitioned intermediate after a successful join.
    CleanupError{ path: PathBuf, err: std::io::Error },
}

impl Display for JoinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use JoinError::*;
        match self {
            DirReadError{ path, err }     => write!(f, "Failed to list output directory '{}': {}", path.display(), err),
            JoinLaunchError{ command, err } => write!(f, "Failed to launch join tool '{}': {}", command, err),
            JoinFailure{ prefix, status, log } => write!(f, "Joining partitioned files '{}.*.nc' failed (exit code {}); captured output:\n{}", prefix, status.code().unwrap_or(-1), log),
            CleanupError{ path, err }     => write!(f, "Failed to remove partitioned intermediate '{}': {}", path.display(), err),
        }
    }
}

impl Error for JoinError {}



/// Errors that relate to the simulation lifecycle itself.
#[derive(Debug)]
pub enum SimulationError {
    /// The requested dates fall outside the blueprint's validity window.
    DateOutOfRange{ name: String, date: String, valid: String },
    /// The requested start date lies after the end date.
    InvertedDates{ name: String, start: String, end: String },
    /// The blueprint has no ROMS component to simulate.
    NoRomsComponent{ name: String },
    /// A codebase failed to install.
    CodebaseError{ name: String, err: cstar_tsk::errors::CodebaseError },
    /// Additional code failed to stage.
    CodeStageError{ name: String, err: cstar_tsk::errors::StageError },
    /// An input dataset failed to stage or materialize.
    DatasetError{ name: String, err: cstar_tsk::errors::DatasetError },
    /// The environment store broke underneath us.
    StoreError{ err: cstar_cfg::errors::EnvStoreError },

    /// A lifecycle method was called in the wrong state.
    WrongState{ name: String, operation: &'static str, state: String, expected: &'static str },
    /// Build was attempted after the rank layout changed.
    StaleBuild{ name: String, built_for: u32, requested: u32 },
    /// A build step failed.
    BuildError{ name: String, command: String, log: String },
    /// Failed to launch a build or partitioning command.
    CommandLaunchError{ name: String, command: String, err: std::io::Error },
    /// Partitioning the input files failed.
    PartitionError{ name: String, command: String, log: String },
    /// No runtime-settings template was staged.
    NoSettingsTemplate{ name: String },
    /// Working with the runtime settings failed.
    SettingsError{ name: String, err: SettingsError },
    /// Submitting or driving the job failed.
    ExecuteError{ name: String, err: cstar_exe::errors::ExecuteError },
    /// Joining the partitioned outputs failed.
    JoinError{ name: String, err: JoinError },

    /// Failed to create a directory.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to serialize the simulation state.
    SerializeError{ name: String, err: serde_json::Error },
    /// Failed to write the persisted state file.
    PersistError{ path: PathBuf, err: std::io::Error },
    /// Failed to read the persisted state file.
    RestoreReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the persisted state file.
    RestoreParseError{ path: PathBuf, err: serde_json::Error },
}

impl Display for SimulationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use SimulationError::*;
        match self {
            DateOutOfRange{ name, date, valid } => write!(f, "Simulation '{}' requests date {} outside the valid range {}", name, date, valid),
            InvertedDates{ name, start, end }   => write!(f, "Simulation '{}' requests start date {} after end date {}", name, start, end),
            NoRomsComponent{ name }             => write!(f, "Blueprint '{}' has no ROMS component to simulate", name),
            CodebaseError{ name, err }          => write!(f, "Simulation '{}': {}", name, err),
            CodeStageError{ name, err }         => write!(f, "Simulation '{}': {}", name, err),
            DatasetError{ name, err }           => write!(f, "Simulation '{}': {}", name, err),
            StoreError{ err }                   => write!(f, "{}", err),

            WrongState{ name, operation, state, expected } => write!(f, "Cannot {} simulation '{}' in state {} (expected {})", operation, name, state, expected),
            StaleBuild{ name, built_for, requested } => write!(f, "Simulation '{}' was built for {} ranks but now requests {}; clean() first", name, built_for, requested),
            BuildError{ name, command, log }    => write!(f, "Build of simulation '{}' failed in '{}'; captured output:\n{}", name, command, log),
            CommandLaunchError{ name, command, err } => write!(f, "Failed to launch '{}' for simulation '{}': {}", command, name, err),
            PartitionError{ name, command, log } => write!(f, "Partitioning inputs of simulation '{}' failed in '{}'; captured output:\n{}", name, command, log),
            NoSettingsTemplate{ name }          => write!(f, "Simulation '{}' has no staged runtime-settings template (expected a '.in' or '.in_TEMPLATE' file in its runtime code)", name),
            SettingsError{ name, err }          => write!(f, "Simulation '{}': {}", name, err),
            ExecuteError{ name, err }           => write!(f, "Simulation '{}': {}", name, err),
            JoinError{ name, err }              => write!(f, "Simulation '{}': {}", name, err),

            DirCreateError{ path, err }      => write!(f, "Failed to create directory '{}': {}", path.display(), err),
            SerializeError{ name, err }      => write!(f, "Failed to serialize state of simulation '{}': {}", name, err),
            PersistError{ path, err }        => write!(f, "Failed to write simulation state file '{}': {}", path.display(), err),
            RestoreReadError{ path, err }    => write!(f, "Failed to read simulation state file '{}': {}", path.display(), err),
            RestoreParseError{ path, err }   => write!(f, "Failed to parse simulation state file '{}': {}", path.display(), err),
        }
    }
}

impl Error for SimulationError {}
