//  SLURM.rs
//    by Lut99
//
//  Created:
//    04 Apr 2024, 10:40:31
//  Last edited:
//    11 Dec 2024, 16:20:44
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the SLURM execution handler: `sbatch` to submit, `sacct`
//!   to poll, `scancel` to cancel. Submission scrubs inherited `SLURM_*`
//!   variables so that submitting from inside another SLURM job works.
//

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::NaiveDateTime;
use log::{debug, info};

use cstar_cfg::scheduler::SchedulerSpec;
use specifications::status::ExecutionStatus;

use crate::errors::ExecuteError as Error;
use crate::script::compose_slurm;
use crate::spec::JobRequest;
use crate::tools::run_scheduler_cmd;


/***** CONSTANTS *****/
/// The inherited `SLURM_*` variables that are _not_ scrubbed on submission.
const KEPT_SLURM_VARS: [&str; 2] = ["SLURM_CONF", "SLURM_VERSION"];





/***** LIBRARY *****/
/// A job owned by a SLURM scheduler.
#[derive(Debug)]
pub struct SlurmJob {
    /// The composed submission script. Empty on a reattached handle, which
    /// can no longer be submitted (it already was).
    script : String,
    /// Where the script is (to be) saved.
    pub script_path : PathBuf,
    /// The directory the job runs in.
    pub run_path    : PathBuf,
    /// Where the job's output goes.
    pub output_file : PathBuf,
    /// The name of the job.
    pub job_name    : String,

    /// The scheduler-assigned job id, once submitted.
    id           : Option<String>,
    /// When the job was submitted, once it was.
    submitted_at : Option<NaiveDateTime>,
    /// The last status the scheduler actually confirmed.
    last_status  : ExecutionStatus,
}

impl SlurmJob {
    /// Composes a new, unsubmitted SLURM job from the given request.
    ///
    /// # Errors
    /// This function errors if the submission script cannot be composed for
    /// this system (unknown queue, underivable node layout).
    pub fn new(request: JobRequest, spec: &SchedulerSpec, system_name: &str) -> Result<Self, Error> {
        let script: String = compose_slurm(&request, spec, system_name)?;
        Ok(Self {
            script,
            script_path  : request.script_path,
            run_path     : request.run_path,
            output_file  : request.output_file,
            job_name     : request.job_name,
            id           : None,
            submitted_at : None,
            last_status  : ExecutionStatus::Unsubmitted,
        })
    }

    /// Rebuilds a handle on an already-submitted job from persisted state.
    pub fn reattach(id: String, script_path: PathBuf, run_path: PathBuf, output_file: PathBuf, job_name: String, submitted_at: Option<NaiveDateTime>) -> Self {
        Self {
            script : String::new(),
            script_path,
            run_path,
            output_file,
            job_name,
            id           : Some(id),
            submitted_at,
            last_status  : ExecutionStatus::Unknown,
        }
    }



    /// Submits the job with `sbatch`. Idempotent: once an id exists, it is
    /// returned without re-submitting.
    ///
    /// # Errors
    /// This function errors if the script cannot be written or `sbatch`
    /// keeps failing.
    pub fn submit(&mut self) -> Result<String, Error> {
        if let Some(id) = &self.id { return Ok(id.clone()); }

        // Save the script
        if let Err(err) = std::fs::write(&self.script_path, &self.script) {
            return Err(Error::ScriptWriteError{ path: self.script_path.clone(), err });
        }
        if let Some(parent) = self.output_file.parent() {
            if !parent.exists() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    return Err(Error::OutputDirError{ path: parent.into(), err });
                }
            }
        }

        // Scrub SLURM_* so submitting from inside another job does not confuse sbatch
        let mut cmd: Command = Command::new("sbatch");
        cmd.arg(&self.script_path);
        cmd.current_dir(&self.run_path);
        for (key, _) in std::env::vars() {
            if key.starts_with("SLURM_") && !KEPT_SLURM_VARS.contains(&key.as_str()) {
                cmd.env_remove(&key);
            }
        }

        let stdout: String = run_scheduler_cmd(&mut cmd)?;
        // Expected shape: "Submitted batch job 123456"
        let id: String = match stdout.rfind(' ').map(|i| &stdout[i + 1..]) {
            Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => id.into(),
            _ => { return Err(Error::SchedulerParseError{ command: "sbatch".into(), output: stdout, reason: "no job id found".into() }); },
        };

        info!("Submitted SLURM job '{}' (id {})", self.job_name, id);
        self.id = Some(id.clone());
        self.submitted_at = Some(chrono::Local::now().naive_local());
        self.last_status = ExecutionStatus::Pending;
        Ok(id)
    }

    /// Queries the scheduler for the job's current status.
    ///
    /// On a query failure [`ExecutionStatus::Unknown`] is returned and the
    /// last confirmed status is retained (see
    /// [`SlurmJob::last_known_status()`]).
    pub fn status(&mut self) -> ExecutionStatus {
        let id: &str = match &self.id {
            Some(id) => id,
            None     => { return ExecutionStatus::Unsubmitted; },
        };

        let mut cmd: Command = Command::new("sacct");
        cmd.args(["-j", id, "--format=State%20", "--noheader"]);
        let stdout: String = match run_scheduler_cmd(&mut cmd) {
            Ok(stdout) => stdout,
            Err(err)   => {
                debug!("sacct query for job {} failed: {}", id, err);
                return ExecutionStatus::Unknown;
            },
        };

        // Walltime overruns (TIMEOUT) count as failures
        let status: ExecutionStatus = if stdout.contains("PENDING") {
            ExecutionStatus::Pending
        } else if stdout.contains("RUNNING") {
            ExecutionStatus::Running
        } else if stdout.contains("COMPLETED") {
            ExecutionStatus::Completed
        } else if stdout.contains("CANCELLED") {
            ExecutionStatus::Cancelled
        } else if stdout.contains("FAILED") || stdout.contains("TIMEOUT") || stdout.contains("OUT_OF_MEMORY") {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Unknown
        };

        if status != ExecutionStatus::Unknown { self.last_status = status; }
        status
    }

    /// Cancels the job with `scancel` if it is not already terminal.
    ///
    /// # Returns
    /// `true` if a cancel was issued, `false` if there was nothing to cancel.
    ///
    /// # Errors
    /// This function errors if `scancel` keeps failing.
    pub fn cancel(&mut self) -> Result<bool, Error> {
        let id: String = match &self.id {
            Some(id) => id.clone(),
            None     => { return Ok(false); },
        };
        if self.status().is_terminal() { return Ok(false); }

        let mut cmd: Command = Command::new("scancel");
        cmd.arg(&id);
        cmd.current_dir(&self.run_path);
        run_scheduler_cmd(&mut cmd)?;

        info!("Cancelled SLURM job {}", id);
        self.last_status = ExecutionStatus::Cancelled;
        Ok(true)
    }



    /// The scheduler-assigned job id, once submitted.
    #[inline]
    pub fn id(&self) -> Option<&str> { self.id.as_deref() }

    /// The composed submission script.
    #[inline]
    pub fn script(&self) -> &str { &self.script }

    /// When the job was submitted, once it was.
    #[inline]
    pub fn submitted_at(&self) -> Option<NaiveDateTime> { self.submitted_at }

    /// The last status the scheduler actually confirmed.
    #[inline]
    pub fn last_known_status(&self) -> ExecutionStatus { self.last_status }

    /// The output file of the job.
    #[inline]
    pub fn output_file(&self) -> &Path { &self.output_file }
}
