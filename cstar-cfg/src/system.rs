//  SYSTEM.rs
//    by Lut99
//
//  Created:
//    19 Mar 2024, 13:02:56
//  Last edited:
//    11 Dec 2024, 10:31:02
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements host classification and the registry of known systems.
//!   Classification prefers the Lmod environment variables HPC sites set,
//!   then falls back to the OS and architecture for laptops and generic
//!   servers.
//

use std::env;
use std::fmt::{Display, Formatter, Result as FResult};

use log::debug;

pub use crate::errors::SystemError as Error;
use crate::scheduler::{Queue, QueueFlavor, SchedulerKind, SchedulerSpec};


/***** CONSTANTS *****/
/// The Lmod variable naming the site host.
pub const ENV_LMOD_SYSHOST: &str = "LMOD_SYSHOST";
/// The Lmod variable naming the system.
pub const ENV_LMOD_SYSNAME: &str = "LMOD_SYSTEM_NAME";
/// Purdue's RCAC cluster variable, used to recognize Anvil.
pub const ENV_RCAC_CLUSTER: &str = "RCAC_CLUSTER";





/***** LIBRARY *****/
/// The compiler families model makefiles understand.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompilerFamily {
    Gnu,
    Intel,
}

impl CompilerFamily {
    /// Renders the family the way model makefiles expect it (`COMPILER=...`).
    #[inline]
    pub fn as_make_arg(&self) -> &'static str {
        match self {
            Self::Gnu   => "gnu",
            Self::Intel => "intel",
        }
    }
}

impl Display for CompilerFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}", self.as_make_arg())
    }
}



/// Everything C-Star knows about one kind of host.
#[derive(Clone, Debug)]
pub struct SystemProfile {
    /// The name classification produced (e.g. `perlmutter`, `linux_x86_64`).
    pub name            : String,
    /// The compiler family to pass to model builds.
    pub compiler        : CompilerFamily,
    /// The prefix for launching MPI programs (e.g. `srun`, `mpirun`).
    pub mpi_exec_prefix : String,
    /// The batch scheduler, or `None` on hosts where jobs run as local processes.
    pub scheduler       : Option<SchedulerSpec>,
}

/// Process-wide view of the host C-Star is running on.
///
/// Construct one with [`SystemManager::detect()`] at startup, or inject a
/// hand-built [`SystemProfile`] in tests via [`SystemManager::with_profile()`].
#[derive(Clone, Debug)]
pub struct SystemManager {
    profile : SystemProfile,
}

impl SystemManager {
    /// Classifies the current host and looks its profile up in the registry.
    ///
    /// # Errors
    /// This function errors if no probe yields a host name, or the name is
    /// not covered by the registry.
    pub fn detect() -> Result<Self, Error> {
        let name: String = hostname()?;
        debug!("Host classified as '{}'", name);
        match profile_for(&name) {
            Some(profile) => Ok(Self{ profile }),
            None          => Err(Error::UnregisteredSystem{ name }),
        }
    }

    /// Wraps the given profile without probing anything.
    #[inline]
    pub fn with_profile(profile: SystemProfile) -> Self {
        Self{ profile }
    }



    /// The name classification produced.
    #[inline]
    pub fn name(&self) -> &str { &self.profile.name }

    /// The compiler family to pass to model builds.
    #[inline]
    pub fn compiler(&self) -> CompilerFamily { self.profile.compiler }

    /// The prefix for launching MPI programs.
    #[inline]
    pub fn mpi_exec_prefix(&self) -> &str { &self.profile.mpi_exec_prefix }

    /// The batch scheduler of this host, if it has one.
    #[inline]
    pub fn scheduler(&self) -> Option<&SchedulerSpec> { self.profile.scheduler.as_ref() }

    /// The full profile.
    #[inline]
    pub fn profile(&self) -> &SystemProfile { &self.profile }
}



/// Determines the host name the registry is keyed on.
///
/// Lmod variables win; Anvil is special-cased through `RCAC_CLUSTER`; and
/// anything else becomes `<os>_<arch>` (e.g. `linux_x86_64`, `macos_aarch64`).
///
/// # Errors
/// This function errors if even the OS/arch fallback produces nothing, which
/// in practice it cannot.
pub fn hostname() -> Result<String, Error> {
    let lmod: String = env::var(ENV_LMOD_SYSHOST)
        .or_else(|_| env::var(ENV_LMOD_SYSNAME))
        .unwrap_or_default()
        .to_lowercase();
    if !lmod.is_empty() { return Ok(lmod); }

    if env::var(ENV_RCAC_CLUSTER).map(|v| v == "anvil").unwrap_or(false) {
        return Ok("anvil".into());
    }

    let os: &str = env::consts::OS;
    let arch: &str = env::consts::ARCH;
    if os.is_empty() || arch.is_empty() {
        return Err(Error::UnknownHost{ diagnostic: format!("os='{}', arch='{}', no Lmod variables set", os, arch) });
    }
    Ok(format!("{}_{}", os, arch))
}

/// Returns the profile registered for the given host name, if any.
///
/// Generic hosts (any `<os>_<arch>` name) always resolve, to a
/// scheduler-less profile.
pub fn profile_for(name: &str) -> Option<SystemProfile> {
    match name {
        "perlmutter" => Some(SystemProfile {
            name            : name.into(),
            compiler        : CompilerFamily::Gnu,
            mpi_exec_prefix : "srun".into(),
            scheduler       : Some(SchedulerSpec {
                kind : SchedulerKind::Slurm,
                queues : vec![
                    Queue::new("regular", QueueFlavor::SlurmQos, None),
                    Queue::new("shared", QueueFlavor::SlurmQos, None),
                    Queue::new("debug", QueueFlavor::SlurmQos, Some("00:30:00")),
                ],
                primary_queue : "regular".into(),
                other_directives : vec![("-C".into(), "cpu".into())],
                requires_task_distribution : false,
                max_cpus_per_node : Some(128),
            }),
        }),

        "anvil" => Some(SystemProfile {
            name            : name.into(),
            compiler        : CompilerFamily::Gnu,
            mpi_exec_prefix : "srun".into(),
            scheduler       : Some(SchedulerSpec {
                kind : SchedulerKind::Slurm,
                queues : vec![
                    Queue::new("wholenode", QueueFlavor::SlurmPartition, None),
                    Queue::new("shared", QueueFlavor::SlurmPartition, None),
                    Queue::new("debug", QueueFlavor::SlurmPartition, Some("02:00:00")),
                ],
                primary_queue : "wholenode".into(),
                other_directives : vec![],
                requires_task_distribution : false,
                max_cpus_per_node : Some(128),
            }),
        }),

        "expanse" => Some(SystemProfile {
            name            : name.into(),
            compiler        : CompilerFamily::Intel,
            mpi_exec_prefix : "srun --mpi=pmi2".into(),
            scheduler       : Some(SchedulerSpec {
                kind : SchedulerKind::Slurm,
                queues : vec![
                    Queue::new("compute", QueueFlavor::SlurmPartition, Some("48:00:00")),
                    Queue::new("debug", QueueFlavor::SlurmPartition, Some("00:30:00")),
                ],
                primary_queue : "compute".into(),
                other_directives : vec![],
                requires_task_distribution : true,
                max_cpus_per_node : Some(128),
            }),
        }),

        "derecho" => Some(SystemProfile {
            name            : name.into(),
            compiler        : CompilerFamily::Intel,
            mpi_exec_prefix : "mpirun".into(),
            scheduler       : Some(SchedulerSpec {
                kind : SchedulerKind::Pbs,
                queues : vec![
                    Queue::new("main", QueueFlavor::PbsQueue, Some("12:00:00")),
                    Queue::new("preempt", QueueFlavor::PbsQueue, Some("24:00:00")),
                    Queue::new("develop", QueueFlavor::PbsQueue, Some("6:00:00")),
                ],
                primary_queue : "main".into(),
                other_directives : vec![],
                requires_task_distribution : true,
                max_cpus_per_node : Some(128),
            }),
        }),

        // Anything that looks like an <os>_<arch> pair is a generic host
        name if name.contains('_') => Some(SystemProfile {
            name            : name.into(),
            compiler        : CompilerFamily::Gnu,
            mpi_exec_prefix : "mpirun".into(),
            scheduler       : None,
        }),

        _ => None,
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_hpc_profiles_resolve() {
        let perlmutter = profile_for("perlmutter").unwrap();
        assert_eq!(perlmutter.scheduler.as_ref().unwrap().kind, SchedulerKind::Slurm);
        assert_eq!(perlmutter.scheduler.as_ref().unwrap().other_directives, vec![("-C".to_string(), "cpu".to_string())]);

        let derecho = profile_for("derecho").unwrap();
        let sched = derecho.scheduler.as_ref().unwrap();
        assert_eq!(sched.kind, SchedulerKind::Pbs);
        assert!(sched.requires_task_distribution);
        assert_eq!(sched.queue(None).unwrap().max_walltime.as_deref(), Some("12:00:00"));
    }

    #[test]
    fn generic_hosts_have_no_scheduler() {
        let generic = profile_for("linux_x86_64").unwrap();
        assert!(generic.scheduler.is_none());
        assert_eq!(generic.mpi_exec_prefix, "mpirun");
    }

    #[test]
    fn unknown_named_hosts_do_not_resolve() {
        assert!(profile_for("deepthought").is_none());
    }

    #[test]
    fn manager_exposes_profile() {
        let mgr = SystemManager::with_profile(profile_for("expanse").unwrap());
        assert_eq!(mgr.name(), "expanse");
        assert_eq!(mgr.compiler(), CompilerFamily::Intel);
        assert_eq!(mgr.mpi_exec_prefix(), "srun --mpi=pmi2");
        assert!(mgr.scheduler().unwrap().requires_task_distribution);
    }
}
