//  DAG.rs
//    by Lut99
//
//  Created:
//    16 Apr 2024, 09:33:02
//  Last edited:
//    05 Dec 2024, 10:12:46
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the step graph of a workplan: cycle detection and the
//!   ready-frontier computation the orchestrator schedules from. Plain
//!   adjacency maps; a workplan has tens of steps, not millions.
//

use std::collections::{HashMap, HashSet};

use specifications::status::StepStatus;
use specifications::workplan::{Step, Workplan};

pub use crate::errors::PlanError as Error;


/***** LIBRARY *****/
/// The dependency graph over a workplan's steps.
#[derive(Debug)]
pub struct TaskGraph<'w> {
    /// The workplan this graph was built from.
    workplan : &'w Workplan,
    /// Maps each step name to the names it depends on.
    deps     : HashMap<&'w str, Vec<&'w str>>,
    /// Maps each step name to the names that depend on it.
    rdeps    : HashMap<&'w str, Vec<&'w str>>,
}

impl<'w> TaskGraph<'w> {
    /// Builds the graph for the given workplan and proves it is a DAG.
    ///
    /// # Errors
    /// This function errors if the workplan is structurally invalid or the
    /// graph has a cycle.
    pub fn new(workplan: &'w Workplan) -> Result<Self, Error> {
        workplan.validate().map_err(|err| Error::WorkplanError{ err })?;

        let mut deps: HashMap<&str, Vec<&str>> = HashMap::with_capacity(workplan.steps.len());
        let mut rdeps: HashMap<&str, Vec<&str>> = HashMap::with_capacity(workplan.steps.len());
        for step in &workplan.steps {
            deps.insert(&step.name, step.depends_on.iter().map(String::as_str).collect());
            rdeps.entry(&step.name).or_default();
        }
        for step in &workplan.steps {
            for dep in &step.depends_on {
                rdeps.entry(dep.as_str()).or_default().push(&step.name);
            }
        }

        let res: Self = Self{ workplan, deps, rdeps };
        res.assert_acyclic()?;
        Ok(res)
    }

    /// Proves the graph has no cycles with a Kahn-style peel.
    fn assert_acyclic(&self) -> Result<(), Error> {
        let mut in_degree: HashMap<&str, usize> = self.deps.iter().map(|(name, deps)| (*name, deps.len())).collect();
        let mut queue: Vec<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();

        let mut seen: usize = 0;
        while let Some(name) = queue.pop() {
            seen += 1;
            for dependent in self.rdeps.get(name).into_iter().flatten() {
                let degree: &mut usize = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 { queue.push(dependent); }
            }
        }

        if seen != self.deps.len() {
            let mut stuck: Vec<String> = in_degree.into_iter().filter(|(_, d)| *d > 0).map(|(n, _)| n.to_string()).collect();
            stuck.sort();
            return Err(Error::Cycle{ workplan: self.workplan.name.clone(), steps: stuck });
        }
        Ok(())
    }



    /// Computes the ready frontier: steps that are still unsubmitted and
    /// whose dependencies have all completed. Steps come out in declaration
    /// order.
    pub fn ready_frontier(&self, statuses: &HashMap<String, StepStatus>) -> Vec<&'w Step> {
        self.workplan
            .steps
            .iter()
            .filter(|step| statuses.get(&step.name).copied().unwrap_or(StepStatus::Unsubmitted) == StepStatus::Unsubmitted)
            .filter(|step| {
                step.depends_on
                    .iter()
                    .all(|dep| statuses.get(dep).copied().unwrap_or(StepStatus::Unsubmitted) == StepStatus::Completed)
            })
            .collect()
    }

    /// Returns all transitive dependents of the given step, for marking
    /// them skipped when it fails.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&'w str> {
        let mut res: Vec<&'w str> = Vec::new();
        let mut seen: HashSet<&'w str> = HashSet::new();
        let mut todo: Vec<&'w str> = self.rdeps.get(name).cloned().unwrap_or_default();
        while let Some(next) = todo.pop() {
            if !seen.insert(next) { continue; }
            res.push(next);
            todo.extend(self.rdeps.get(next).cloned().unwrap_or_default());
        }
        res
    }

    /// The workplan this graph was built from.
    #[inline]
    pub fn workplan(&self) -> &'w Workplan { self.workplan }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use specifications::workplan::WorkplanState;

    fn workplan(deps: &[(&str, &[&str])]) -> Workplan {
        Workplan {
            name        : "test".into(),
            description : "test plan".into(),
            state       : WorkplanState::Draft,
            steps       : deps
                .iter()
                .map(|(name, depends_on)| Step {
                    name                : name.to_string(),
                    application         : "sleep".into(),
                    blueprint           : "./bp.yaml".into(),
                    depends_on          : depends_on.iter().map(|d| d.to_string()).collect(),
                    blueprint_overrides : Default::default(),
                    compute_overrides   : Default::default(),
                    workflow_overrides  : Default::default(),
                })
                .collect(),
            compute_environment : Default::default(),
            runtime_vars        : Default::default(),
        }
    }

    #[test]
    fn linear_chains_are_dags() {
        let wp = workplan(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        TaskGraph::new(&wp).unwrap();
    }

    #[test]
    fn cycles_are_rejected() {
        let wp = workplan(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        match TaskGraph::new(&wp) {
            Err(Error::Cycle{ steps, .. }) => assert_eq!(steps, vec!["a".to_string(), "b".to_string(), "c".to_string()]),
            other => panic!("expected a cycle error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn frontier_respects_dependencies_and_order() {
        let wp = workplan(&[("job1", &[]), ("job2", &["job1"]), ("job3", &[])]);
        let graph = TaskGraph::new(&wp).unwrap();

        // Initially only the independent steps are ready, in declaration order
        let statuses: HashMap<String, StepStatus> = HashMap::new();
        let frontier: Vec<&str> = graph.ready_frontier(&statuses).into_iter().map(|s| s.name.as_str()).collect();
        assert_eq!(frontier, vec!["job1", "job3"]);

        // job2 becomes ready only once job1 completed
        let mut statuses: HashMap<String, StepStatus> = HashMap::new();
        statuses.insert("job1".into(), StepStatus::Running);
        statuses.insert("job3".into(), StepStatus::Running);
        assert!(graph.ready_frontier(&statuses).is_empty());

        statuses.insert("job1".into(), StepStatus::Completed);
        let frontier: Vec<&str> = graph.ready_frontier(&statuses).into_iter().map(|s| s.name.as_str()).collect();
        assert_eq!(frontier, vec!["job2"]);
    }

    #[test]
    fn dependents_are_transitive() {
        let wp = workplan(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let graph = TaskGraph::new(&wp).unwrap();

        let mut dependents = graph.transitive_dependents("a");
        dependents.sort();
        assert_eq!(dependents, vec!["b", "c"]);
        assert!(graph.transitive_dependents("d").is_empty());
    }
}
