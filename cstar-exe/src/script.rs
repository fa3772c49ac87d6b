//  SCRIPT.rs
//    by Lut99
//
//  Created:
//    03 Apr 2024, 09:12:56
//  Last edited:
//    11 Dec 2024, 15:44:28
//  Auto updated?
//    Yes
//
//  Description:
//!   Deterministic composition of scheduler submission scripts. Given the
//!   same request and system, the same bytes come out; everything varying
//!   (job name, output path) is part of the request.
//

use chrono::NaiveDateTime;

use cstar_cfg::scheduler::{QueueFlavor, SchedulerSpec};

use crate::errors::SubmitConfigError as Error;
use crate::spec::JobRequest;


/***** LIBRARY *****/
/// Formats the default job name for the given timestamp: `cstar_job_YYYYMMDD_HHMMSS`.
#[inline]
pub fn default_job_name(stamp: &NaiveDateTime) -> String {
    format!("cstar_job_{}", stamp.format("%Y%m%d_%H%M%S"))
}



/// Composes a SLURM submission script for the given request.
///
/// The queue lands as `--qos` or `--partition` depending on how this system
/// spells its queues; systems that insist on an explicit layout get
/// `--nodes`/`--ntasks-per-node` lines instead of a flat `--ntasks`.
///
/// # Errors
/// This function errors if the system requires a node layout but none can be
/// derived from its profile.
pub fn compose_slurm(request: &JobRequest, spec: &SchedulerSpec, system_name: &str) -> Result<String, Error> {
    let mut script: String = String::from("#!/bin/bash");
    script.push_str(&format!("\n#SBATCH --job-name={}", request.job_name));
    script.push_str(&format!("\n#SBATCH --output={}", request.output_file.display()));

    match spec.queue(Some(&request.queue)).map(|q| q.flavor) {
        Some(QueueFlavor::SlurmQos)       => script.push_str(&format!("\n#SBATCH --qos={}", request.queue)),
        Some(QueueFlavor::SlurmPartition) => script.push_str(&format!("\n#SBATCH --partition={}", request.queue)),
        _                                 => { return Err(Error::UnknownQueue{ system: system_name.into(), queue: request.queue.clone() }); },
    }

    if spec.requires_task_distribution {
        let (nodes, per_node): (u32, u32) = match spec.node_distribution(request.n_ranks) {
            Some(layout) => layout,
            None         => { return Err(Error::NoNodeDistribution{ system: system_name.into(), n_ranks: request.n_ranks }); },
        };
        script.push_str(&format!("\n#SBATCH --nodes={}", nodes));
        script.push_str(&format!("\n#SBATCH --ntasks-per-node={}", per_node));
    } else {
        script.push_str(&format!("\n#SBATCH --ntasks={}", request.n_ranks));
    }

    script.push_str(&format!("\n#SBATCH --account={}", request.account));
    script.push_str("\n#SBATCH --export=ALL");
    script.push_str("\n#SBATCH --mail-type=ALL");
    script.push_str(&format!("\n#SBATCH --time={}", request.walltime));
    for (key, value) in &spec.other_directives {
        script.push_str(&format!("\n#SBATCH {} {}", key, value));
    }

    script.push_str(&format!("\n\n{}", request.commands));
    Ok(script)
}



/// Composes a PBS submission script for the given request.
///
/// # Errors
/// This function errors if no node layout can be derived (PBS always wants
/// an explicit `select` line).
pub fn compose_pbs(request: &JobRequest, spec: &SchedulerSpec, system_name: &str) -> Result<String, Error> {
    let (nodes, per_node): (u32, u32) = match spec.node_distribution(request.n_ranks) {
        Some(layout) => layout,
        None         => { return Err(Error::NoNodeDistribution{ system: system_name.into(), n_ranks: request.n_ranks }); },
    };

    let mut script: String = String::from("#PBS -S /bin/bash");
    script.push_str(&format!("\n#PBS -N {}", request.job_name));
    script.push_str(&format!("\n#PBS -o {}", request.output_file.display()));
    script.push_str(&format!("\n#PBS -A {}", request.account));
    script.push_str(&format!("\n#PBS -l select={}:ncpus={},walltime={}", nodes, per_node, request.walltime));
    script.push_str(&format!("\n#PBS -q {}", request.queue));
    script.push_str("\n#PBS -j oe");
    script.push_str("\n#PBS -k eod");
    script.push_str("\n#PBS -V");
    for (key, value) in &spec.other_directives {
        script.push_str(&format!("\n#PBS {} {}", key, value));
    }
    script.push_str("\ncd ${PBS_O_WORKDIR}");

    script.push_str(&format!("\n\n{}", request.commands));
    Ok(script)
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use cstar_cfg::scheduler::{Queue, SchedulerKind};
    use specifications::dates::parse_datetime;

    fn request() -> JobRequest {
        JobRequest {
            commands    : "srun -n 6 ./roms roms.in".into(),
            account     : "m1234".into(),
            queue       : "regular".into(),
            walltime    : "12:00:00".into(),
            n_ranks     : 6,
            job_name    : "cstar_job_20240402_101500".into(),
            script_path : PathBuf::from("/work/sim/cstar_job_20240402_101500.sh"),
            run_path    : PathBuf::from("/work/sim"),
            output_file : PathBuf::from("/work/sim/output/cstar_job_20240402_101500.out"),
        }
    }

    #[test]
    fn job_names_follow_the_convention() {
        let stamp = parse_datetime("2024-04-02 10:15:00").unwrap();
        assert_eq!(default_job_name(&stamp), "cstar_job_20240402_101500");
    }

    #[test]
    fn slurm_script_with_qos_and_constraint() {
        let spec = SchedulerSpec {
            kind : SchedulerKind::Slurm,
            queues : vec![Queue::new("regular", QueueFlavor::SlurmQos, None)],
            primary_queue : "regular".into(),
            other_directives : vec![("-C".into(), "cpu".into())],
            requires_task_distribution : false,
            max_cpus_per_node : Some(128),
        };

        let script = compose_slurm(&request(), &spec, "perlmutter").unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=cstar_job_20240402_101500"));
        assert!(script.contains("#SBATCH --qos=regular"));
        assert!(script.contains("#SBATCH --ntasks=6"));
        assert!(script.contains("#SBATCH -C cpu"));
        assert!(script.ends_with("\n\nsrun -n 6 ./roms roms.in"));
        assert!(!script.contains("--partition"));

        // Determinism: same request, same bytes
        assert_eq!(compose_slurm(&request(), &spec, "perlmutter").unwrap(), script);
    }

    #[test]
    fn slurm_script_with_partition_and_layout() {
        let spec = SchedulerSpec {
            kind : SchedulerKind::Slurm,
            queues : vec![Queue::new("compute", QueueFlavor::SlurmPartition, Some("48:00:00"))],
            primary_queue : "compute".into(),
            other_directives : vec![],
            requires_task_distribution : true,
            max_cpus_per_node : Some(128),
        };
        let mut req = request();
        req.queue = "compute".into();
        req.n_ranks = 192;

        let script = compose_slurm(&req, &spec, "expanse").unwrap();
        assert!(script.contains("#SBATCH --partition=compute"));
        assert!(script.contains("#SBATCH --nodes=2"));
        assert!(script.contains("#SBATCH --ntasks-per-node=96"));
        assert!(!script.contains("--ntasks="));
    }

    #[test]
    fn pbs_script_shape() {
        let spec = SchedulerSpec {
            kind : SchedulerKind::Pbs,
            queues : vec![Queue::new("main", QueueFlavor::PbsQueue, Some("12:00:00"))],
            primary_queue : "main".into(),
            other_directives : vec![],
            requires_task_distribution : true,
            max_cpus_per_node : Some(128),
        };
        let mut req = request();
        req.queue = "main".into();

        let script = compose_pbs(&req, &spec, "derecho").unwrap();
        assert!(script.starts_with("#PBS -S /bin/bash\n"));
        assert!(script.contains("#PBS -l select=1:ncpus=6,walltime=12:00:00"));
        assert!(script.contains("#PBS -q main"));
        assert!(script.contains("\ncd ${PBS_O_WORKDIR}"));
        assert!(script.ends_with("\n\nsrun -n 6 ./roms roms.in"));
    }
}
