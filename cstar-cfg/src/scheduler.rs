/* SCHEDULER.rs
 *   by Lut99
 *
 * Created:
 *   19 Mar 2024, 10:20:08
 * Last edited:
 *   03 Dec 2024, 16:55:27
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Describes batch schedulers as data: which flavor, which queues, what
 *   their walltime caps are and which extra directives submission scripts
 *   must carry. The actual submitting lives in `cstar-exe`; this module
 *   only knows what the machines look like.
**/

use std::fmt::{Display, Formatter, Result as FResult};

pub use crate::errors::SystemError as Error;


/***** LIBRARY *****/
/// The batch scheduler flavors C-Star can drive.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SchedulerKind {
    Slurm,
    Pbs,
}

impl Display for SchedulerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        match self {
            Self::Slurm => write!(f, "SLURM"),
            Self::Pbs   => write!(f, "PBS"),
        }
    }
}



/// How a SLURM installation names the thing jobs are submitted to. The
/// distinction matters because it selects the `--qos` or `--partition`
/// directive; PBS queues are just queues.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueueFlavor {
    SlurmQos,
    SlurmPartition,
    PbsQueue,
}



/// One queue (or QOS, or partition) on a scheduler.
#[derive(Clone, Debug)]
pub struct Queue {
    /// The name jobs are submitted under.
    pub name         : String,
    /// Whether this is a QOS, a partition or a PBS queue.
    pub flavor       : QueueFlavor,
    /// The maximum walltime this queue accepts, as `HH:MM:SS`. `None` when
    /// the cap cannot be determined statically (SLURM queues on most hosts).
    pub max_walltime : Option<String>,
}

impl Queue {
    /// Shorthand constructor.
    #[inline]
    pub fn new(name: impl Into<String>, flavor: QueueFlavor, max_walltime: Option<&str>) -> Self {
        Self{ name: name.into(), flavor, max_walltime: max_walltime.map(String::from) }
    }
}



/// Everything C-Star needs to know to drive the scheduler of one system.
#[derive(Clone, Debug)]
pub struct SchedulerSpec {
    /// Which scheduler flavor this is.
    pub kind : SchedulerKind,
    /// The queues jobs may be submitted to.
    pub queues : Vec<Queue>,
    /// The queue used when the user specifies none.
    pub primary_queue : String,
    /// Extra directives every submission script must carry, rendered
    /// verbatim as `#SBATCH <key> <value>` / `#PBS <key> <value>` lines.
    /// Which keys exist is host-specific; the table is extensible.
    pub other_directives : Vec<(String, String)>,
    /// Whether the scheduler insists on an explicit nodes x cpus-per-node
    /// layout instead of a flat task count.
    pub requires_task_distribution : bool,
    /// The number of CPUs per node, when known. Needed to derive a layout
    /// when `requires_task_distribution` is set.
    pub max_cpus_per_node : Option<u32>,
}

impl SchedulerSpec {
    /// Returns the queue with the given name, or the primary queue when no
    /// name is given.
    pub fn queue(&self, name: Option<&str>) -> Option<&Queue> {
        let name: &str = name.unwrap_or(&self.primary_queue);
        self.queues.iter().find(|q| q.name == name)
    }

    /// Derives a `(nodes, cpus_per_node)` layout for the given total rank
    /// count on this system.
    ///
    /// For example, 192 ranks on a 128-cores-per-node system become 2 nodes
    /// of 96 ranks each.
    ///
    /// # Returns
    /// `None` when the scheduler does not require a distribution or the
    /// per-node CPU count is unknown.
    pub fn node_distribution(&self, n_ranks: u32) -> Option<(u32, u32)> {
        if !self.requires_task_distribution { return None; }
        let per_node: u32 = self.max_cpus_per_node?;

        let nodes: u32 = n_ranks.div_ceil(per_node);
        let spare: u32 = nodes * per_node - n_ranks;
        let cpus: u32 = per_node - spare / nodes;
        Some((nodes, cpus))
    }
}



/// Parses a `HH:MM:SS` walltime into seconds.
///
/// # Errors
/// This function errors if the string does not have exactly three
/// colon-separated numeric fields.
pub fn walltime_seconds(raw: impl AsRef<str>) -> Result<u64, Error> {
    let raw: &str = raw.as_ref();

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 { return Err(Error::IllegalWalltime{ raw: raw.into() }); }

    let mut fields: [u64; 3] = [0; 3];
    for (i, part) in parts.iter().enumerate() {
        match part.parse::<u64>() {
            Ok(val) => { fields[i] = val; },
            Err(_)  => { return Err(Error::IllegalWalltime{ raw: raw.into() }); },
        }
    }
    Ok(fields[0] * 3600 + fields[1] * 60 + fields[2])
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walltimes_parse() {
        assert_eq!(walltime_seconds("48:00:00").unwrap(), 48 * 3600);
        assert_eq!(walltime_seconds("00:30:15").unwrap(), 30 * 60 + 15);
        assert!(walltime_seconds("90 minutes").is_err());
        assert!(walltime_seconds("12:00").is_err());
    }

    #[test]
    fn node_distribution_matches_hand_math() {
        let spec = SchedulerSpec {
            kind : SchedulerKind::Pbs,
            queues : vec![],
            primary_queue : "main".into(),
            other_directives : vec![],
            requires_task_distribution : true,
            max_cpus_per_node : Some(128),
        };

        // 192 ranks on 128-core nodes: 2 nodes of 96
        assert_eq!(spec.node_distribution(192), Some((2, 96)));
        // An exact fit stays exact
        assert_eq!(spec.node_distribution(256), Some((2, 128)));
        // Small jobs fit one node
        assert_eq!(spec.node_distribution(6), Some((1, 6)));
    }

    #[test]
    fn flat_schedulers_skip_distribution() {
        let spec = SchedulerSpec {
            kind : SchedulerKind::Slurm,
            queues : vec![Queue::new("regular", QueueFlavor::SlurmQos, None)],
            primary_queue : "regular".into(),
            other_directives : vec![],
            requires_task_distribution : false,
            max_cpus_per_node : Some(128),
        };
        assert_eq!(spec.node_distribution(192), None);
        assert_eq!(spec.queue(None).unwrap().name, "regular");
        assert!(spec.queue(Some("nonsense")).is_none());
    }
}
