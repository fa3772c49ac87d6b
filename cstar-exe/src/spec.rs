//  SPEC.rs
//    by Lut99
//
//  Created:
//    02 Apr 2024, 11:20:37
//  Last edited:
//    11 Dec 2024, 15:30:10
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines what a job submission looks like before it becomes a script,
//!   and the policy that resolves account, queue and walltime from
//!   explicit arguments, environment variables and queue defaults.
//

use std::env;
use std::path::PathBuf;

use log::warn;

use cstar_cfg::scheduler::{walltime_seconds, SchedulerKind, SchedulerSpec};
use cstar_cfg::spec::{
    DEFAULT_MAX_WALLTIME, ENV_CSTAR_PBS_ACCOUNT, ENV_CSTAR_PBS_QUEUE, ENV_CSTAR_SLURM_ACCOUNT, ENV_CSTAR_SLURM_MAX_WALLTIME,
    ENV_CSTAR_SLURM_QUEUE,
};

use crate::errors::SubmitConfigError as Error;


/***** LIBRARY *****/
/// Everything needed to compose and submit one scheduler job.
#[derive(Clone, Debug)]
pub struct JobRequest {
    /// The command line the job runs (e.g. `srun -n 6 ./roms roms.in`).
    pub commands    : String,
    /// The account the job is charged to.
    pub account     : String,
    /// The queue (or QOS, or partition) submitted to.
    pub queue       : String,
    /// The walltime, as `HH:MM:SS`.
    pub walltime    : String,
    /// The total number of MPI ranks.
    pub n_ranks     : u32,
    /// The name of the job.
    pub job_name    : String,
    /// Where the submission script is written.
    pub script_path : PathBuf,
    /// The directory the job runs in.
    pub run_path    : PathBuf,
    /// Where the job's stdout/stderr go.
    pub output_file : PathBuf,
}

/// The resolved account/queue/walltime triple of a submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmitPolicy {
    pub account  : String,
    pub queue    : String,
    pub walltime : String,
}

/// Resolves account, queue and walltime for a submission on the given scheduler.
///
/// Resolution order, per knob:
/// - account: explicit argument, then `$CSTAR_SLURM_ACCOUNT` (or the PBS
///   equivalent). No further fallback: a missing account is a configuration
///   error at submission time.
/// - queue: explicit argument, then `$CSTAR_SLURM_QUEUE` (or PBS
///   equivalent), then the system's primary queue.
/// - walltime: explicit argument, then the queue's maximum, then
///   `$CSTAR_SLURM_MAX_WALLTIME`, then 48:00:00. An explicit walltime above
///   the queue's known maximum is rejected; against an unknown maximum it is
///   passed through with a warning.
///
/// # Errors
/// This function errors if the account is missing, the queue unknown, or the
/// walltime illegal or too large.
pub fn resolve_submission(
    spec: &SchedulerSpec,
    system_name: &str,
    account: Option<&str>,
    queue_name: Option<&str>,
    walltime: Option<&str>,
) -> Result<SubmitPolicy, Error> {
    let (account_var, queue_var): (&'static str, &'static str) = match spec.kind {
        SchedulerKind::Slurm => (ENV_CSTAR_SLURM_ACCOUNT, ENV_CSTAR_SLURM_QUEUE),
        SchedulerKind::Pbs   => (ENV_CSTAR_PBS_ACCOUNT, ENV_CSTAR_PBS_QUEUE),
    };

    // Account: argument, env var, or bust
    let account: String = match account.map(String::from).or_else(|| env::var(account_var).ok()) {
        Some(account) if !account.is_empty() => account,
        _ => { return Err(Error::MissingAccount{ var: account_var }); },
    };

    // Queue: argument, env var, primary
    let queue_name: String = queue_name
        .map(String::from)
        .or_else(|| env::var(queue_var).ok())
        .unwrap_or_else(|| spec.primary_queue.clone());
    let queue = match spec.queue(Some(&queue_name)) {
        Some(queue) => queue,
        None        => { return Err(Error::UnknownQueue{ system: system_name.into(), queue: queue_name }); },
    };

    // Walltime: argument, queue max, env var, hard default
    let walltime: String = match walltime {
        Some(walltime) => {
            match &queue.max_walltime {
                Some(max) => {
                    let wt: u64 = walltime_seconds(walltime).map_err(|err| Error::IllegalWalltime{ err })?;
                    let mx: u64 = walltime_seconds(max).map_err(|err| Error::IllegalWalltime{ err })?;
                    if wt > mx {
                        return Err(Error::WalltimeExceedsMax{ queue: queue.name.clone(), walltime: walltime.into(), max: max.clone() });
                    }
                },
                None => {
                    warn!("Cannot determine the maximum walltime of queue '{}'; if {} exceeds it, the scheduler will reject this job", queue.name, walltime);
                },
            }
            walltime.into()
        },
        None => match &queue.max_walltime {
            Some(max) => {
                warn!("No walltime given; using the maximum of queue '{}', {}", queue.name, max);
                max.clone()
            },
            None => {
                let fallback: String = env::var(ENV_CSTAR_SLURM_MAX_WALLTIME).unwrap_or_else(|_| DEFAULT_MAX_WALLTIME.into());
                warn!("No walltime given and queue '{}' has no known maximum; using {}", queue.name, fallback);
                fallback
            },
        },
    };

    Ok(SubmitPolicy{ account, queue: queue.name.clone(), walltime })
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use cstar_cfg::scheduler::{Queue, QueueFlavor};

    fn slurm_spec() -> SchedulerSpec {
        SchedulerSpec {
            kind : SchedulerKind::Slurm,
            queues : vec![
                Queue::new("regular", QueueFlavor::SlurmQos, None),
                Queue::new("debug", QueueFlavor::SlurmQos, Some("00:30:00")),
            ],
            primary_queue : "regular".into(),
            other_directives : vec![],
            requires_task_distribution : false,
            max_cpus_per_node : Some(128),
        }
    }

    #[test]
    fn explicit_arguments_win() {
        let policy = resolve_submission(&slurm_spec(), "testhost", Some("m1234"), Some("debug"), Some("00:10:00")).unwrap();
        assert_eq!(policy, SubmitPolicy{ account: "m1234".into(), queue: "debug".into(), walltime: "00:10:00".into() });
    }

    #[test]
    fn missing_account_is_a_config_error() {
        std::env::remove_var(ENV_CSTAR_SLURM_ACCOUNT);
        assert!(matches!(
            resolve_submission(&slurm_spec(), "testhost", None, Some("debug"), Some("00:10:00")),
            Err(Error::MissingAccount{ var: ENV_CSTAR_SLURM_ACCOUNT }),
        ));
    }

    #[test]
    fn walltime_above_queue_max_is_rejected() {
        assert!(matches!(
            resolve_submission(&slurm_spec(), "testhost", Some("m1234"), Some("debug"), Some("01:00:00")),
            Err(Error::WalltimeExceedsMax{ .. }),
        ));
    }

    #[test]
    fn queue_max_is_the_default_walltime() {
        let policy = resolve_submission(&slurm_spec(), "testhost", Some("m1234"), Some("debug"), None).unwrap();
        assert_eq!(policy.walltime, "00:30:00");
    }

    #[test]
    fn unknown_queue_is_rejected() {
        assert!(matches!(
            resolve_submission(&slurm_spec(), "testhost", Some("m1234"), Some("imaginary"), None),
            Err(Error::UnknownQueue{ .. }),
        ));
    }
}
