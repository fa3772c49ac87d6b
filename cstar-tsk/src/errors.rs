//  ERRORS.rs
//    by Lut99
//
//  Created:
//    25 Mar 2024, 09:20:31
//  Last edited:
//    09 Dec 2024, 16:02:13
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `cstar-tsk` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::process::ExitStatus;


/***** LIBRARY *****/
/// Errors that relate to fetching files and repositories.
#[derive(Debug)]
pub enum RetrieveError {
    /// Failed to build the HTTP client.
    ClientBuildError{ err: reqwest::Error },
    /// The request itself failed (transport-level), after all retries.
    RequestError{ url: String, err: reqwest::Error },
    /// The server replied with a non-success status code.
    RequestFailure{ url: String, status: reqwest::StatusCode },
    /// Failed to read the next chunk of the response body.
    DownloadError{ url: String, err: reqwest::Error },
    /// The downloaded (or copied) bytes do not hash to what was promised.
    HashMismatch{ source: String, expected: String, got: String },
    /// Failed to create a temporary download file.
    TempFileError{ dir: PathBuf, err: std::io::Error },
    /// Failed to write to the temporary download file.
    TempWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to move the finished download into place.
    PersistError{ path: PathBuf, err: std::io::Error },
    /// Failed to read a file while hashing it.
    FileReadError{ path: PathBuf, err: std::io::Error },

    /// Failed to clone the given repository.
    CloneError{ url: String, target: PathBuf, err: git2::Error },
    /// Failed to open a pre-existing clone.
    RepoOpenError{ path: PathBuf, err: git2::Error },
    /// A pre-existing clone points at another remote.
    RemoteMismatch{ path: PathBuf, expected: String, got: String },
    /// The requested ref does not exist in the repository.
    UnknownRef{ url: String, target: String, err: git2::Error },
    /// Failed to fetch from the remote of a pre-existing clone.
    FetchError{ path: PathBuf, err: git2::Error },
    /// Failed to check out the requested ref.
    CheckoutError{ path: PathBuf, target: String, err: git2::Error },
}

impl Display for RetrieveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use RetrieveError::*;
        match self {
            ClientBuildError{ err }       => write!(f, "Failed to build HTTP client: {}", err),
            RequestError{ url, err }      => write!(f, "Failed to send GET-request to '{}': {}", url, err),
            RequestFailure{ url, status } => write!(f, "GET-request to '{}' returned status {} ({})", url, status.as_u16(), status.canonical_reason().unwrap_or("?")),
            DownloadError{ url, err }     => write!(f, "Failed to download body of '{}': {}", url, err),
            HashMismatch{ source, expected, got } => write!(f, "Contents of '{}' hash to {}, expected {}", source, got, expected),
            TempFileError{ dir, err }     => write!(f, "Failed to create temporary download file in '{}': {}", dir.display(), err),
            TempWriteError{ path, err }   => write!(f, "Failed to write to temporary download file '{}': {}", path.display(), err),
            PersistError{ path, err }     => write!(f, "Failed to move finished download to '{}': {}", path.display(), err),
            FileReadError{ path, err }    => write!(f, "Failed to read file '{}': {}", path.display(), err),

            CloneError{ url, target, err }   => write!(f, "Failed to clone '{}' to '{}': {}", url, target.display(), err),
            RepoOpenError{ path, err }       => write!(f, "Failed to open repository at '{}': {}", path.display(), err),
            RemoteMismatch{ path, expected, got } => write!(f, "Repository at '{}' has remote '{}', expected '{}'", path.display(), got, expected),
            UnknownRef{ url, target, err }   => write!(f, "Repository '{}' has no ref '{}': {}", url, target, err),
            FetchError{ path, err }          => write!(f, "Failed to fetch into repository at '{}': {}", path.display(), err),
            CheckoutError{ path, target, err } => write!(f, "Failed to check out '{}' in repository at '{}': {}", target, path.display(), err),
        }
    }
}

impl Error for RetrieveError {}



/// Errors that relate to staging working copies of resources.
#[derive(Debug)]
pub enum StageError {
    /// Failed to fetch a remote resource.
    RetrieveError{ err: RetrieveError },
    /// Failed to create the target directory.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to copy a local file into the target directory.
    CopyError{ source: PathBuf, target: PathBuf, err: std::io::Error },
    /// A file already present at the target hashes to something else.
    StaleTarget{ path: PathBuf, expected: String, got: String },
    /// A listed file is missing from the staged repository.
    MissingRepoFile{ repo: String, file: String },
    /// A listed file is missing from the target after staging.
    MissingStagedFile{ dir: PathBuf, file: String },
    /// A local source file does not exist.
    SourceNotFound{ path: PathBuf },
}

impl Display for StageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use StageError::*;
        match self {
            RetrieveError{ err }            => write!(f, "Failed to retrieve resource: {}", err),
            DirCreateError{ path, err }     => write!(f, "Failed to create directory '{}': {}", path.display(), err),
            CopyError{ source, target, err } => write!(f, "Failed to copy '{}' to '{}': {}", source.display(), target.display(), err),
            StaleTarget{ path, expected, got } => write!(f, "File '{}' is already staged but hashes to {}, expected {} (pass force to overwrite)", path.display(), got, expected),
            MissingRepoFile{ repo, file }   => write!(f, "Repository '{}' does not contain listed file '{}'", repo, file),
            MissingStagedFile{ dir, file }  => write!(f, "Staged directory '{}' is missing listed file '{}'", dir.display(), file),
            SourceNotFound{ path }          => write!(f, "Source file '{}' does not exist", path.display()),
        }
    }
}

impl Error for StageError {}



/// Errors that relate to installing and building external codebases.
#[derive(Debug)]
pub enum CodebaseError {
    /// Failed to fetch the codebase repository.
    RetrieveError{ name: String, err: RetrieveError },
    /// Failed to spawn a build command.
    BuildLaunchError{ name: String, command: String, err: std::io::Error },
    /// A build command returned a non-zero exit status.
    BuildError{ name: String, command: String, status: ExitStatus, log: String },
    /// Failed to persist the install root to the environment store.
    StoreError{ name: String, err: cstar_cfg::errors::EnvStoreError },
}

impl Display for CodebaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use CodebaseError::*;
        match self {
            RetrieveError{ name, err }             => write!(f, "Failed to retrieve codebase '{}': {}", name, err),
            BuildLaunchError{ name, command, err } => write!(f, "Failed to launch build command '{}' for codebase '{}': {}", command, name, err),
            BuildError{ name, command, status, log } => write!(f, "Build command '{}' for codebase '{}' returned exit code {}; captured output:\n{}", command, name, status.code().unwrap_or(-1), log),
            StoreError{ name, err }                => write!(f, "Failed to record install root of codebase '{}': {}", name, err),
        }
    }
}

impl Error for CodebaseError {}



/// Errors that relate to input datasets and their materialization.
#[derive(Debug)]
pub enum DatasetError {
    /// Failed to stage the dataset file itself.
    StageError{ location: String, err: StageError },
    /// The dataset is a recipe but has not been staged yet.
    NotStaged{ location: String },
    /// Failed to launch the external generator.
    GeneratorLaunchError{ recipe: PathBuf, command: String, err: std::io::Error },
    /// The external generator failed.
    GeneratorError{ recipe: PathBuf, range: String, command: String, log: String },
    /// The generator ran but produced no netCDF files.
    NoOutputs{ recipe: PathBuf },
    /// Failed to list the directory next to the recipe.
    DirReadError{ path: PathBuf, err: std::io::Error },
    /// The simulation's date range is not covered by the dataset.
    RangeNotCovered{ location: String, requested: String, available: String },
}

impl Display for DatasetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DatasetError::*;
        match self {
            StageError{ location, err } => write!(f, "Failed to stage dataset '{}': {}", location, err),
            NotStaged{ location }       => write!(f, "Dataset '{}' has not been staged yet", location),
            GeneratorLaunchError{ recipe, command, err } => write!(f, "Failed to launch dataset generator '{}' for recipe '{}': {}", command, recipe.display(), err),
            GeneratorError{ recipe, range, command, log } => write!(f, "Dataset generator '{}' failed for recipe '{}' over {}; captured output:\n{}", command, recipe.display(), range, log),
            NoOutputs{ recipe }         => write!(f, "Dataset generator produced no netCDF files for recipe '{}'", recipe.display()),
            DirReadError{ path, err }   => write!(f, "Failed to list directory '{}': {}", path.display(), err),
            RangeNotCovered{ location, requested, available } => write!(f, "Dataset '{}' covers {} but the simulation requests {}", location, available, requested),
        }
    }
}

impl Error for DatasetError {}
