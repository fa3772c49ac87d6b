//  SPEC.rs
//    by Lut99
//
//  Created:
//    18 Mar 2024, 09:12:45
//  Last edited:
//    11 Dec 2024, 10:09:33
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the environment variables C-Star recognizes and the helpers
//!   that resolve them to effective values.
//

use std::env;
use std::path::{Path, PathBuf};

use crate::errors::EnvStoreError;


/***** CONSTANTS *****/
/// Root of all C-Star state. Defaults to `~/.cstar`.
pub const ENV_CSTAR_HOME: &str = "CSTAR_HOME";
/// Where run-ID directories live. Defaults to `$CSTAR_HOME/assets`.
pub const ENV_CSTAR_OUTDIR: &str = "CSTAR_OUTDIR";
/// Number of workers used by the post-run output join. Defaults to a third of the CPUs.
pub const ENV_CSTAR_NPROCS_POST: &str = "CSTAR_NPROCS_POST";
/// When `1`, installed codebases are re-fetched instead of reused.
pub const ENV_CSTAR_FRESH_CODEBASES: &str = "CSTAR_FRESH_CODEBASES";
/// When `1`, existing simulation working directories may be wiped.
pub const ENV_CSTAR_CLOBBER_WORKING_DIR: &str = "CSTAR_CLOBBER_WORKING_DIR";
/// The SLURM account to charge jobs to when none is passed explicitly.
pub const ENV_CSTAR_SLURM_ACCOUNT: &str = "CSTAR_SLURM_ACCOUNT";
/// The SLURM queue to submit to when none is passed explicitly.
pub const ENV_CSTAR_SLURM_QUEUE: &str = "CSTAR_SLURM_QUEUE";
/// The walltime used when neither the caller nor the queue provides one.
pub const ENV_CSTAR_SLURM_MAX_WALLTIME: &str = "CSTAR_SLURM_MAX_WALLTIME";
/// The PBS account to charge jobs to when none is passed explicitly.
pub const ENV_CSTAR_PBS_ACCOUNT: &str = "CSTAR_PBS_ACCOUNT";
/// The PBS queue to submit to when none is passed explicitly.
pub const ENV_CSTAR_PBS_QUEUE: &str = "CSTAR_PBS_QUEUE";
/// A default run-ID for workplan runs that do not pass one on the command line.
pub const ENV_CSTAR_RUNID: &str = "CSTAR_RUNID";
/// Granularity of the auto-transform time split: `monthly`, `weekly` or `daily`.
pub const ENV_CSTAR_ORCH_TRX_FREQ: &str = "CSTAR_ORCH_TRX_FREQ";
/// Test-only override for the external dataset generator command.
pub const ENV_CSTAR_CMD_CONVERTER_OVERRIDE: &str = "CSTAR_CMD_CONVERTER_OVERRIDE";

/// The fallback walltime when a queue's maximum cannot be determined.
pub const DEFAULT_MAX_WALLTIME: &str = "48:00:00";

/// The name of the environment store file, relative to the user's home or `$CSTAR_HOME`.
pub const ENV_STORE_FILE: &str = ".cstar.env";





/***** LIBRARY *****/
/// Expands a leading `~` in the given path to the user's home directory.
///
/// # Errors
/// This function errors if the path starts with `~` but `$HOME` is unset.
pub fn expand_tilde(path: impl AsRef<Path>) -> Result<PathBuf, EnvStoreError> {
    let path: &Path = path.as_ref();

    match path.strip_prefix("~") {
        Ok(rest) => match env::var_os("HOME") {
            Some(home) => Ok(PathBuf::from(home).join(rest)),
            None       => Err(EnvStoreError::NoHomeDirectory),
        },
        Err(_) => Ok(path.into()),
    }
}

/// Returns the effective C-Star home directory (`$CSTAR_HOME`, default `~/.cstar`).
///
/// # Errors
/// This function errors if the home directory cannot be determined.
pub fn cstar_home() -> Result<PathBuf, EnvStoreError> {
    match env::var_os(ENV_CSTAR_HOME) {
        Some(home) => expand_tilde(PathBuf::from(home)),
        None       => expand_tilde("~/.cstar"),
    }
}

/// Returns the effective output directory (`$CSTAR_OUTDIR`, default `$CSTAR_HOME/assets`).
///
/// # Errors
/// This function errors if the home directory cannot be determined.
pub fn cstar_outdir() -> Result<PathBuf, EnvStoreError> {
    match env::var_os(ENV_CSTAR_OUTDIR) {
        Some(dir) => expand_tilde(PathBuf::from(dir)),
        None      => Ok(cstar_home()?.join("assets")),
    }
}

/// Returns the effective location of the environment store file.
///
/// This is `$CSTAR_HOME/.cstar.env` when `$CSTAR_HOME` is set and
/// `~/.cstar.env` otherwise.
///
/// # Errors
/// This function errors if the home directory cannot be determined.
pub fn env_store_path() -> Result<PathBuf, EnvStoreError> {
    match env::var_os(ENV_CSTAR_HOME) {
        Some(home) => Ok(expand_tilde(PathBuf::from(home))?.join(ENV_STORE_FILE)),
        None       => expand_tilde(format!("~/{}", ENV_STORE_FILE)),
    }
}

/// Returns the number of workers the post-run join may use
/// (`$CSTAR_NPROCS_POST`, default a third of the CPUs, minimum 1).
pub fn nprocs_post() -> usize {
    if let Ok(raw) = env::var(ENV_CSTAR_NPROCS_POST) {
        if let Ok(n) = raw.parse::<usize>() {
            if n >= 1 { return n; }
        }
        log::warn!("Ignoring illegal {} value '{}'", ENV_CSTAR_NPROCS_POST, raw);
    }
    let cpus: usize = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    std::cmp::max(cpus / 3, 1)
}

/// Returns whether installed codebases must be re-fetched (`$CSTAR_FRESH_CODEBASES=1`).
#[inline]
pub fn fresh_codebases() -> bool {
    env::var(ENV_CSTAR_FRESH_CODEBASES).map(|v| v == "1").unwrap_or(false)
}

/// Returns whether existing working directories may be wiped (`$CSTAR_CLOBBER_WORKING_DIR=1`).
#[inline]
pub fn clobber_working_dir() -> bool {
    env::var(ENV_CSTAR_CLOBBER_WORKING_DIR).map(|v| v == "1").unwrap_or(false)
}

/// The environment variable under which an installed codebase records its root.
#[inline]
pub fn codebase_root_var(name: impl AsRef<str>) -> String {
    format!("{}_ROOT", name.as_ref().to_uppercase())
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expansion() {
        std::env::set_var("HOME", "/home/alice");
        assert_eq!(expand_tilde("~/.cstar.env").unwrap(), PathBuf::from("/home/alice/.cstar.env"));
        assert_eq!(expand_tilde("/absolute/path").unwrap(), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn codebase_root_vars() {
        assert_eq!(codebase_root_var("roms"), "ROMS_ROOT");
        assert_eq!(codebase_root_var("MARBL"), "MARBL_ROOT");
    }
}
