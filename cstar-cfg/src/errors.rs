//  ERRORS.rs
//    by Lut99
//
//  Created:
//    18 Mar 2024, 09:01:14
//  Last edited:
//    21 Nov 2024, 13:47:02
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `cstar-cfg` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Errors that relate to the persistent environment store.
#[derive(Debug)]
pub enum EnvStoreError {
    /// Failed to read the store file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to create the temporary file for an atomic write.
    TempFileError{ dir: PathBuf, err: std::io::Error },
    /// Failed to write to the temporary file.
    TempWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to move the temporary file over the store file.
    PersistError{ path: PathBuf, err: std::io::Error },
    /// Failed to create the parent directory of the store file.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// The user's home directory could not be determined.
    NoHomeDirectory,
}

impl Display for EnvStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use EnvStoreError::*;
        match self {
            FileReadError{ path, err } => write!(f, "Failed to read environment store '{}': {}", path.display(), err),
            TempFileError{ dir, err }  => write!(f, "Failed to create temporary file in '{}': {}", dir.display(), err),
            TempWriteError{ path, err } => write!(f, "Failed to write temporary environment store '{}': {}", path.display(), err),
            PersistError{ path, err }   => write!(f, "Failed to move temporary file over environment store '{}': {}", path.display(), err),
            DirCreateError{ path, err } => write!(f, "Failed to create directory '{}': {}", path.display(), err),
            NoHomeDirectory             => write!(f, "Cannot determine the user's home directory (is $HOME set?)"),
        }
    }
}

impl Error for EnvStoreError {}



/// Errors that relate to classifying the host system.
#[derive(Debug)]
pub enum SystemError {
    /// None of the probes produced a usable host name.
    UnknownHost{ diagnostic: String },
    /// The host name was recognized by no registered system profile.
    UnregisteredSystem{ name: String },
    /// A walltime string could not be parsed as `HH:MM:SS`.
    IllegalWalltime{ raw: String },
}

impl Display for SystemError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use SystemError::*;
        match self {
            UnknownHost{ diagnostic }  => write!(f, "Cannot determine the host system name ({})", diagnostic),
            UnregisteredSystem{ name } => write!(f, "Host system '{}' matches no registered system profile", name),
            IllegalWalltime{ raw }     => write!(f, "Cannot parse '{}' as a HH:MM:SS walltime", raw),
        }
    }
}

impl Error for SystemError {}
