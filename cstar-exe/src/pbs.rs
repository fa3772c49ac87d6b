//  PBS.rs
//    by Lut99
//
//  Created:
//    04 Apr 2024, 14:11:08
//  Last edited:
//    11 Dec 2024, 16:31:50
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the PBS execution handler: `qsub` to submit, `qstat` (in
//!   JSON mode) to poll, `qdel` to cancel. Finished jobs report `F` with a
//!   separate exit status, which decides completed-versus-failed.
//

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::NaiveDateTime;
use log::{debug, info};

use cstar_cfg::scheduler::SchedulerSpec;
use specifications::status::ExecutionStatus;

use crate::errors::ExecuteError as Error;
use crate::script::compose_pbs;
use crate::spec::JobRequest;
use crate::tools::run_scheduler_cmd;


/***** HELPER FUNCTIONS *****/
/// Maps a parsed `qstat` JSON document to a status.
///
/// This is separate from the querying so the mapping itself is testable
/// without a scheduler around.
pub fn interpret_qstat(payload: &serde_json::Value, id: &str) -> Option<ExecutionStatus> {
    let job = payload.get("Jobs")?.as_object()?.values().next()?;
    let state: &str = job.get("job_state")?.as_str()?;

    let status: ExecutionStatus = match state {
        "Q" => ExecutionStatus::Pending,
        "R" => ExecutionStatus::Running,
        "C" => ExecutionStatus::Completed,
        "H" => ExecutionStatus::Held,
        "E" => ExecutionStatus::Ending,
        "F" => {
            // Finished: the exit status decides
            let exit: i64 = job.get("Exit_status").and_then(|v| v.as_i64()).unwrap_or(1);
            if exit == 0 { ExecutionStatus::Completed } else { ExecutionStatus::Failed }
        },
        other => {
            debug!("Unmapped PBS state '{}' for job {}", other, id);
            ExecutionStatus::Unknown
        },
    };
    Some(status)
}





/***** LIBRARY *****/
/// A job owned by a PBS scheduler.
#[derive(Debug)]
pub struct PbsJob {
    /// The composed submission script. Empty on a reattached handle.
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

impl PbsJob {
    /// Composes a new, unsubmitted PBS job from the given request.
    ///
    /// # Errors
    /// This function errors if the submission script cannot be composed
    /// (PBS always needs a derivable node layout).
    pub fn new(request: JobRequest, spec: &SchedulerSpec, system_name: &str) -> Result<Self, Error> {
        let script: String = compose_pbs(&request, spec, system_name)?;
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



    /// Submits the job with `qsub`. Idempotent: once an id exists, it is
    /// returned without re-submitting.
    ///
    /// # Errors
    /// This function errors if the script cannot be written, `qsub` keeps
    /// failing, or its answer is not a job id.
    pub fn submit(&mut self) -> Result<String, Error> {
        if let Some(id) = &self.id { return Ok(id.clone()); }

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

        let mut cmd: Command = Command::new("qsub");
        cmd.arg(&self.script_path);
        cmd.current_dir(&self.run_path);
        let stdout: String = run_scheduler_cmd(&mut cmd)?;

        // Expected shape: "7063621.desched1" - keep the numeric part
        let id: String = match stdout.split('.').next() {
            Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => id.into(),
            _ => { return Err(Error::SchedulerParseError{ command: "qsub".into(), output: stdout, reason: "no job id found".into() }); },
        };

        info!("Submitted PBS job '{}' (id {})", self.job_name, id);
        self.id = Some(id.clone());
        self.submitted_at = Some(chrono::Local::now().naive_local());
        self.last_status = ExecutionStatus::Pending;
        Ok(id)
    }

    /// Queries the scheduler for the job's current status.
    ///
    /// On a query failure [`ExecutionStatus::Unknown`] is returned and the
    /// last confirmed status retained.
    pub fn status(&mut self) -> ExecutionStatus {
        let id: String = match &self.id {
            Some(id) => id.clone(),
            None     => { return ExecutionStatus::Unsubmitted; },
        };

        let mut cmd: Command = Command::new("qstat");
        cmd.args(["-x", "-f", "-F", "json", &id]);
        let stdout: String = match run_scheduler_cmd(&mut cmd) {
            Ok(stdout) => stdout,
            Err(err)   => {
                debug!("qstat query for job {} failed: {}", id, err);
                return ExecutionStatus::Unknown;
            },
        };

        let payload: serde_json::Value = match serde_json::from_str(&stdout) {
            Ok(payload) => payload,
            Err(err)    => {
                debug!("qstat returned unparseable JSON for job {}: {}", id, err);
                return ExecutionStatus::Unknown;
            },
        };
        let status: ExecutionStatus = interpret_qstat(&payload, &id).unwrap_or(ExecutionStatus::Unknown);

        if status != ExecutionStatus::Unknown { self.last_status = status; }
        status
    }

    /// Cancels the job with `qdel` if it is not already terminal. PBS also
    /// allows cancelling held jobs.
    ///
    /// # Returns
    /// `true` if a cancel was issued, `false` if there was nothing to cancel.
    ///
    /// # Errors
    /// This function errors if `qdel` keeps failing.
    pub fn cancel(&mut self) -> Result<bool, Error> {
        let id: String = match &self.id {
            Some(id) => id.clone(),
            None     => { return Ok(false); },
        };
        if self.status().is_terminal() { return Ok(false); }

        let mut cmd: Command = Command::new("qdel");
        cmd.arg(&id);
        cmd.current_dir(&self.run_path);
        run_scheduler_cmd(&mut cmd)?;

        info!("Cancelled PBS job {}", id);
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





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn qstat_states_map() {
        let queued = json!({ "Jobs": { "123.host": { "job_state": "Q" } } });
        assert_eq!(interpret_qstat(&queued, "123"), Some(ExecutionStatus::Pending));

        let held = json!({ "Jobs": { "123.host": { "job_state": "H" } } });
        assert_eq!(interpret_qstat(&held, "123"), Some(ExecutionStatus::Held));

        let ending = json!({ "Jobs": { "123.host": { "job_state": "E" } } });
        assert_eq!(interpret_qstat(&ending, "123"), Some(ExecutionStatus::Ending));
    }

    #[test]
    fn finished_jobs_split_on_exit_status() {
        let ok = json!({ "Jobs": { "123.host": { "job_state": "F", "Exit_status": 0 } } });
        assert_eq!(interpret_qstat(&ok, "123"), Some(ExecutionStatus::Completed));

        let bad = json!({ "Jobs": { "123.host": { "job_state": "F", "Exit_status": 271 } } });
        assert_eq!(interpret_qstat(&bad, "123"), Some(ExecutionStatus::Failed));

        // A finished job with no exit status at all counts as failed
        let missing = json!({ "Jobs": { "123.host": { "job_state": "F" } } });
        assert_eq!(interpret_qstat(&missing, "123"), Some(ExecutionStatus::Failed));
    }

    #[test]
    fn empty_payload_yields_none() {
        assert_eq!(interpret_qstat(&json!({}), "123"), None);
        assert_eq!(interpret_qstat(&json!({ "Jobs": {} }), "123"), None);
    }
}
