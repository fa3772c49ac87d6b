//  HANDLER.rs
//    by Lut99
//
//  Created:
//    05 Apr 2024, 09:30:17
//  Last edited:
//    11 Dec 2024, 16:55:38
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the [`JobHandle`]: the closed sum over the execution targets
//!   C-Star supports. Everything downstream (simulations, the
//!   orchestrator) talks to this type and never to a concrete handler.
//

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};

use cstar_cfg::scheduler::SchedulerKind;
use cstar_cfg::system::SystemManager;
use specifications::status::ExecutionStatus;

use crate::errors::ExecuteError as Error;
use crate::local::LocalProcess;
use crate::pbs::PbsJob;
use crate::slurm::SlurmJob;
use crate::spec::JobRequest;


/***** LIBRARY *****/
/// The execution targets C-Star supports. New targets extend this sum.
#[derive(Debug)]
pub enum JobHandle {
    Local(LocalProcess),
    Slurm(SlurmJob),
    Pbs(PbsJob),
}

impl JobHandle {
    /// Creates the right scheduler-backed handle for the given system.
    ///
    /// # Errors
    /// This function errors if the script cannot be composed. Calling this
    /// on a scheduler-less system is a logic error; use
    /// [`JobHandle::local()`] there.
    pub fn scheduled(request: JobRequest, system: &SystemManager) -> Result<Self, Error> {
        match system.scheduler() {
            Some(spec) => match spec.kind {
                SchedulerKind::Slurm => Ok(Self::Slurm(SlurmJob::new(request, spec, system.name())?)),
                SchedulerKind::Pbs   => Ok(Self::Pbs(PbsJob::new(request, spec, system.name())?)),
            },
            None => Ok(Self::local(request.commands, request.run_path, request.output_file)),
        }
    }

    /// Creates a local-process handle for the given command line.
    #[inline]
    pub fn local(commands: impl Into<String>, run_path: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self::Local(LocalProcess::new(commands, run_path, output_file))
    }



    /// Submits the job (spawns the process, for the local variant) and
    /// returns the handler id. Idempotent once submitted.
    ///
    /// # Errors
    /// This function errors if submission fails; see the concrete handlers.
    pub fn submit(&mut self) -> Result<String, Error> {
        match self {
            Self::Local(proc) => {
                proc.start()?;
                Ok(String::from("local"))
            },
            Self::Slurm(job) => job.submit(),
            Self::Pbs(job)   => job.submit(),
        }
    }

    /// Returns the job's current status. For scheduler-backed handles this
    /// queries the scheduler and may take a few seconds.
    pub fn status(&mut self) -> ExecutionStatus {
        match self {
            Self::Local(proc) => proc.status(),
            Self::Slurm(job)  => job.status(),
            Self::Pbs(job)    => job.status(),
        }
    }

    /// Cancels the job if it is not already terminal.
    ///
    /// # Returns
    /// `true` if a cancel was actually issued, `false` for a terminal or
    /// never-submitted job.
    ///
    /// # Errors
    /// This function errors if the cancel itself fails.
    pub fn cancel(&mut self) -> Result<bool, Error> {
        match self {
            Self::Local(proc) => proc.cancel(),
            Self::Slurm(job)  => job.cancel(),
            Self::Pbs(job)    => job.cancel(),
        }
    }

    /// Streams lines appended to the job's output file to stdout.
    ///
    /// Runs for `seconds` seconds, or, when `seconds` is 0, until the job
    /// reaches a terminal state (or the caller drops the future).
    ///
    /// # Errors
    /// This function errors if the output file cannot be read once it exists.
    pub async fn updates(&mut self, seconds: u64) -> Result<(), Error> {
        let output_file: PathBuf = self.output_file().into();
        let deadline: Option<tokio::time::Instant> = if seconds > 0 { Some(tokio::time::Instant::now() + Duration::from_secs(seconds)) } else { None };

        let mut pos: u64 = 0;
        loop {
            // Drain whatever has appeared since last time
            if output_file.exists() {
                let mut handle: std::fs::File = match std::fs::File::open(&output_file) {
                    Ok(handle) => handle,
                    Err(err)   => { return Err(Error::OutputOpenError{ path: output_file, err }); },
                };
                if handle.seek(SeekFrom::Start(pos)).is_ok() {
                    let mut buf: String = String::new();
                    if let Ok(n_bytes) = handle.read_to_string(&mut buf) {
                        if n_bytes > 0 {
                            print!("{}", buf);
                            pos += n_bytes as u64;
                        }
                    }
                }
            }

            // Stop at the deadline, or at job completion in follow mode
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline { break; }
            } else if self.status().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }



    /// The handler id, once submitted. `local` for local processes.
    pub fn id(&self) -> Option<String> {
        match self {
            Self::Local(_)   => Some(String::from("local")),
            Self::Slurm(job) => job.id().map(String::from),
            Self::Pbs(job)   => job.id().map(String::from),
        }
    }

    /// The composed submission script, for scheduler-backed handles.
    pub fn script(&self) -> Option<&str> {
        match self {
            Self::Local(_)   => None,
            Self::Slurm(job) => Some(job.script()),
            Self::Pbs(job)   => Some(job.script()),
        }
    }

    /// Where the submission script lives, for scheduler-backed handles.
    pub fn script_path(&self) -> Option<&Path> {
        match self {
            Self::Local(_)   => None,
            Self::Slurm(job) => Some(&job.script_path),
            Self::Pbs(job)   => Some(&job.script_path),
        }
    }

    /// The job's output file.
    pub fn output_file(&self) -> &Path {
        match self {
            Self::Local(proc) => proc.output_file(),
            Self::Slurm(job)  => job.output_file(),
            Self::Pbs(job)    => job.output_file(),
        }
    }

    /// When the job was submitted, when known.
    pub fn submitted_at(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Local(_)   => None,
            Self::Slurm(job) => job.submitted_at(),
            Self::Pbs(job)   => job.submitted_at(),
        }
    }

    /// Snapshots this handle into its persistable form.
    pub fn record(&self) -> HandlerRecord {
        let kind: HandlerKind = match self {
            Self::Local(_) => HandlerKind::Local,
            Self::Slurm(_) => HandlerKind::Slurm,
            Self::Pbs(_)   => HandlerKind::Pbs,
        };
        HandlerRecord {
            kind,
            id           : self.id(),
            script_path  : self.script_path().map(PathBuf::from),
            output_file  : self.output_file().into(),
            run_path     : match self {
                Self::Local(proc) => proc.run_path.clone(),
                Self::Slurm(job)  => job.run_path.clone(),
                Self::Pbs(job)    => job.run_path.clone(),
            },
            job_name     : match self {
                Self::Local(_)   => String::from("local"),
                Self::Slurm(job) => job.job_name.clone(),
                Self::Pbs(job)   => job.job_name.clone(),
            },
            submitted_at : self.submitted_at(),
        }
    }
}



/// The kinds a [`HandlerRecord`] can be.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Local,
    Slurm,
    Pbs,
}

/// The persistable form of a [`JobHandle`]: enough to find the job again in
/// a later session.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HandlerRecord {
    /// Which concrete handler this was.
    pub kind         : HandlerKind,
    /// The handler id, if it was submitted.
    pub id           : Option<String>,
    /// Where the submission script lives, for scheduler-backed handles.
    pub script_path  : Option<PathBuf>,
    /// The job's output file.
    pub output_file  : PathBuf,
    /// The directory the job ran in.
    pub run_path     : PathBuf,
    /// The name of the job.
    pub job_name     : String,
    /// When the job was submitted, if known.
    pub submitted_at : Option<NaiveDateTime>,
}

impl HandlerRecord {
    /// Rebuilds a live handle from this record.
    ///
    /// # Returns
    /// `None` for local processes (they do not survive the session that
    /// spawned them) and for records that were never submitted.
    pub fn rehydrate(&self) -> Option<JobHandle> {
        let id: String = self.id.clone()?;
        match self.kind {
            HandlerKind::Local => {
                warn!("Cannot re-attach to local process (job '{}'); its state is lost with its session", self.job_name);
                None
            },
            HandlerKind::Slurm => Some(JobHandle::Slurm(SlurmJob::reattach(
                id,
                self.script_path.clone().unwrap_or_default(),
                self.run_path.clone(),
                self.output_file.clone(),
                self.job_name.clone(),
                self.submitted_at,
            ))),
            HandlerKind::Pbs => Some(JobHandle::Pbs(PbsJob::reattach(
                id,
                self.script_path.clone().unwrap_or_default(),
                self.run_path.clone(),
                self.output_file.clone(),
                self.job_name.clone(),
                self.submitted_at,
            ))),
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_handle_runs_and_tails() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = JobHandle::local("echo tail me", dir.path(), dir.path().join("out.txt"));

        assert_eq!(handle.id(), Some(String::from("local")));
        handle.submit().unwrap();
        // Follow mode stops once the echo exits
        handle.updates(0).await.unwrap();
        assert_eq!(handle.status(), ExecutionStatus::Completed);
    }

    #[test]
    fn submit_is_idempotent_for_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = JobHandle::local("echo once", dir.path(), dir.path().join("out.txt"));
        let id1 = handle.submit().unwrap();
        let id2 = handle.submit().unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn records_roundtrip_through_json() {
        let record = HandlerRecord {
            kind         : HandlerKind::Slurm,
            id           : Some("123456".into()),
            script_path  : Some(PathBuf::from("/work/sim/cstar_job_20240402_101500.sh")),
            output_file  : PathBuf::from("/work/sim/output/cstar_job_20240402_101500.out"),
            run_path     : PathBuf::from("/work/sim"),
            job_name     : "cstar_job_20240402_101500".into(),
            submitted_at : None,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: HandlerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn slurm_records_rehydrate_with_their_id() {
        let record = HandlerRecord {
            kind         : HandlerKind::Slurm,
            id           : Some("123456".into()),
            script_path  : None,
            output_file  : PathBuf::from("/work/out.txt"),
            run_path     : PathBuf::from("/work"),
            job_name     : "cstar_job_20240402_101500".into(),
            submitted_at : None,
        };
        let handle = record.rehydrate().unwrap();
        assert_eq!(handle.id(), Some("123456".into()));

        // Local records do not survive sessions
        let local = HandlerRecord{ kind: HandlerKind::Local, ..record };
        assert!(local.rehydrate().is_none());
    }
}
