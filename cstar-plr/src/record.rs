//  RECORD.rs
//    by Lut99
//
//  Created:
//    17 Apr 2024, 10:29:51
//  Last edited:
//    12 Dec 2024, 10:50:33
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the job record: the single, schema-versioned JSON file
//!   under a run-ID directory that makes workplan runs resumable across
//!   processes. A PID-bearing lockfile keeps two live orchestrators out of
//!   the same run-ID.
//

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use cstar_exe::handler::HandlerRecord;
use specifications::status::StepStatus;
use specifications::workplan::{Workplan, WorkplanError};

pub use crate::errors::RecordError as Error;


/***** CONSTANTS *****/
/// The name of the record file inside a run directory.
pub const RECORD_FILE: &str = "state.json";

/// The name of the lockfile inside a run directory.
pub const LOCK_FILE: &str = ".lock";

/// The subdirectory submission scripts are kept in.
pub const SCRIPTS_DIR: &str = "submit_scripts";

/// The subdirectory step outputs land in.
pub const OUTPUTS_DIR: &str = "outputs";

/// The version of the record schema.
pub const RECORD_SCHEMA_VERSION: u32 = 1;





/***** LIBRARY *****/
/// Digests a workplan over its canonicalized YAML (sorted keys, comments
/// stripped by parsing), so the same logical plan always digests the same.
///
/// # Errors
/// This function errors if canonicalization fails.
pub fn workplan_digest(workplan: &Workplan) -> Result<String, WorkplanError> {
    let canonical: String = workplan.canonical_yaml()?;
    let mut hasher: Sha256 = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}



/// What the record remembers about one step.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StepRecord {
    /// The step's scheduling status.
    pub status       : StepStatus,
    /// The handler snapshot, once submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler      : Option<HandlerRecord>,
    /// Where the step's output file lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path  : Option<PathBuf>,
    /// Where the step's submission script lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path  : Option<PathBuf>,
    /// When the step was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at : Option<NaiveDateTime>,
    /// When the step was observed terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at  : Option<NaiveDateTime>,
}

impl StepRecord {
    /// A fresh, unsubmitted step record.
    #[inline]
    pub fn unsubmitted() -> Self {
        Self {
            status       : StepStatus::Unsubmitted,
            handler      : None,
            output_path  : None,
            script_path  : None,
            submitted_at : None,
            finished_at  : None,
        }
    }
}



/// The whole job record of one run-ID.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct JobRecord {
    /// The version of this schema.
    pub schema_version  : u32,
    /// The run-ID this record belongs to.
    pub run_id          : String,
    /// The digest of the workplan this run executes.
    pub workplan_digest : String,
    /// Per-step state, keyed by step name.
    pub steps           : BTreeMap<String, StepRecord>,
}

impl JobRecord {
    /// Opens the record for the given run, or creates a fresh one.
    ///
    /// A pre-existing record is re-used (that is what makes runs
    /// resumable), unless its digest disagrees with the given workplan's;
    /// that is a run-ID conflict, overridable with `force` (which resets
    /// the record).
    ///
    /// # Errors
    /// This function errors on I/O trouble or a digest conflict.
    pub fn open_or_create(run_dir: impl AsRef<Path>, run_id: impl Into<String>, workplan: &Workplan, digest: String, force: bool) -> Result<Self, Error> {
        let run_dir: &Path = run_dir.as_ref();
        let run_id: String = run_id.into();

        for dir in [run_dir.into(), run_dir.join(SCRIPTS_DIR), run_dir.join(OUTPUTS_DIR)] {
            if !dir.exists() {
                if let Err(err) = fs::create_dir_all(&dir) {
                    return Err(Error::DirCreateError{ path: dir, err });
                }
            }
        }

        let path: PathBuf = run_dir.join(RECORD_FILE);
        if path.exists() {
            let existing: Self = Self::load(&path)?;
            if existing.workplan_digest == digest {
                debug!("Resuming existing job record for run '{}'", run_id);
                return Ok(existing);
            }
            if !force {
                return Err(Error::RunIdConflict{ run_id, stored: existing.workplan_digest, computed: digest });
            }
            warn!("Overwriting job record of run '{}' (digest mismatch, force given)", run_id);
        }

        Ok(Self {
            schema_version  : RECORD_SCHEMA_VERSION,
            run_id,
            workplan_digest : digest,
            steps           : workplan.steps.iter().map(|s| (s.name.clone(), StepRecord::unsubmitted())).collect(),
        })
    }

    /// Loads the record at the given path.
    ///
    /// # Errors
    /// This function errors if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path: &Path = path.as_ref();
        let raw: String = match fs::read_to_string(path) {
            Ok(raw)  => raw,
            Err(err) => { return Err(Error::FileReadError{ path: path.into(), err }); },
        };
        match serde_json::from_str(&raw) {
            Ok(res)  => Ok(res),
            Err(err) => Err(Error::FileParseError{ path: path.into(), err }),
        }
    }

    /// Writes the record into the given run directory, atomically.
    ///
    /// # Errors
    /// This function errors if serialization or the write fails.
    pub fn save(&self, run_dir: impl AsRef<Path>) -> Result<(), Error> {
        let run_dir: &Path = run_dir.as_ref();
        let path: PathBuf = run_dir.join(RECORD_FILE);

        let raw: String = match serde_json::to_string_pretty(self) {
            Ok(raw)  => raw,
            Err(err) => { return Err(Error::SerializeError{ err }); },
        };
        let mut tmp: NamedTempFile = match NamedTempFile::new_in(run_dir) {
            Ok(tmp)  => tmp,
            Err(err) => { return Err(Error::FileWriteError{ path, err }); },
        };
        if let Err(err) = tmp.write_all(raw.as_bytes()) {
            return Err(Error::FileWriteError{ path, err });
        }
        if let Err(err) = tmp.persist(&path) {
            return Err(Error::FileWriteError{ path, err: err.error });
        }
        Ok(())
    }



    /// Returns the statuses of all steps, keyed by name.
    pub fn statuses(&self) -> std::collections::HashMap<String, StepStatus> {
        self.steps.iter().map(|(name, record)| (name.clone(), record.status)).collect()
    }

    /// Returns whether every step is terminal.
    #[inline]
    pub fn all_terminal(&self) -> bool {
        self.steps.values().all(|record| record.status.is_terminal())
    }

    /// Returns whether every step completed successfully.
    #[inline]
    pub fn all_completed(&self) -> bool {
        self.steps.values().all(|record| record.status == StepStatus::Completed)
    }
}



/// A held lock on a run directory. Dropping it releases the lock.
#[derive(Debug)]
pub struct RunLock {
    path : PathBuf,
}

impl RunLock {
    /// Takes the lock for the given run directory.
    ///
    /// A lockfile naming a PID that is still alive means another
    /// orchestrator owns this run-ID; a stale lockfile (dead PID) is
    /// replaced with a warning.
    ///
    /// # Errors
    /// This function errors if the run is locked by a live process or the
    /// lockfile cannot be written.
    pub fn acquire(run_dir: impl AsRef<Path>, run_id: impl AsRef<str>) -> Result<Self, Error> {
        let run_dir: &Path = run_dir.as_ref();
        let path: PathBuf = run_dir.join(LOCK_FILE);

        if path.exists() {
            let owner: Option<u32> = fs::read_to_string(&path).ok().and_then(|raw| raw.trim().parse().ok());
            match owner {
                Some(pid) if pid_alive(pid) => {
                    return Err(Error::Locked{ run_id: run_id.as_ref().into(), pid, path });
                },
                Some(pid) => warn!("Replacing stale lockfile '{}' (process {} is gone)", path.display(), pid),
                None      => warn!("Replacing corrupted lockfile '{}'", path.display()),
            }
        }

        if let Err(err) = fs::write(&path, std::process::id().to_string()) {
            return Err(Error::LockError{ path, err });
        }
        Ok(Self{ path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Failed to remove lockfile '{}': {}", self.path.display(), err);
        }
    }
}

/// Returns whether the given PID names a live process.
fn pid_alive(pid: u32) -> bool {
    // Good enough on the platforms C-Star targets; elsewhere, err on the
    // side of treating the lock as held
    if cfg!(target_os = "linux") {
        Path::new(&format!("/proc/{}", pid)).exists()
    } else {
        true
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use specifications::workplan::Workplan;

    fn workplan() -> Workplan {
        Workplan::from_yaml(
            "name: wp\ndescription: two jobs\nsteps:\n  - name: job1\n    application: sleep\n    blueprint: ./a.yaml\n  - name: job2\n    application: sleep\n    blueprint: ./b.yaml\n    depends_on: [job1]\n",
        )
        .unwrap()
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let wp = workplan();
        let d1 = workplan_digest(&wp).unwrap();
        let d2 = workplan_digest(&wp).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);

        let mut wp2 = wp.clone();
        wp2.steps[1].depends_on.clear();
        assert_ne!(workplan_digest(&wp2).unwrap(), d1);
    }

    #[test]
    fn fresh_records_cover_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let wp = workplan();
        let digest = workplan_digest(&wp).unwrap();

        let record = JobRecord::open_or_create(dir.path(), "r1", &wp, digest, false).unwrap();
        assert_eq!(record.steps.len(), 2);
        assert!(record.steps.values().all(|s| s.status == StepStatus::Unsubmitted));
        assert!(dir.path().join(SCRIPTS_DIR).is_dir());
        assert!(dir.path().join(OUTPUTS_DIR).is_dir());
    }

    #[test]
    fn same_run_id_resumes_and_conflicts_need_force() {
        let dir = tempfile::tempdir().unwrap();
        let wp = workplan();
        let digest = workplan_digest(&wp).unwrap();

        let mut record = JobRecord::open_or_create(dir.path(), "r1", &wp, digest.clone(), false).unwrap();
        record.steps.get_mut("job1").unwrap().status = StepStatus::Completed;
        record.save(dir.path()).unwrap();

        // Same digest: resumed, completed step still there
        let resumed = JobRecord::open_or_create(dir.path(), "r1", &wp, digest, false).unwrap();
        assert_eq!(resumed.steps.get("job1").unwrap().status, StepStatus::Completed);

        // Different plan under the same run-ID: conflict without force
        let mut wp2 = workplan();
        wp2.steps[1].depends_on.clear();
        let digest2 = workplan_digest(&wp2).unwrap();
        assert!(matches!(
            JobRecord::open_or_create(dir.path(), "r1", &wp2, digest2.clone(), false),
            Err(Error::RunIdConflict{ .. }),
        ));
        let reset = JobRecord::open_or_create(dir.path(), "r1", &wp2, digest2, true).unwrap();
        assert_eq!(reset.steps.get("job1").unwrap().status, StepStatus::Unsubmitted);
    }

    #[test]
    fn lock_is_exclusive_while_held() {
        let dir = tempfile::tempdir().unwrap();

        let lock = RunLock::acquire(dir.path(), "r1").unwrap();
        // Our own PID is alive, so a second acquire must refuse
        assert!(matches!(RunLock::acquire(dir.path(), "r1"), Err(Error::Locked{ .. })));

        drop(lock);
        let _relock = RunLock::acquire(dir.path(), "r1").unwrap();
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn stale_locks_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        // PID 4000000 is above the default linux pid_max
        fs::write(dir.path().join(LOCK_FILE), "4000000").unwrap();
        let _lock = RunLock::acquire(dir.path(), "r1").unwrap();
    }
}
