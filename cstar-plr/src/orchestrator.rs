//  ORCHESTRATOR.rs
//    by Lut99
//
//  Created:
//    18 Apr 2024, 09:02:44
//  Last edited:
//    12 Dec 2024, 12:05:36
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the workplan run loop: validate, digest, open the run-ID's
//!   job record, then keep submitting the ready frontier and folding
//!   scheduler observations back into the record until every step is
//!   terminal. The record hits disk before control ever leaves this
//!   module, which is what makes a kill-and-rerun safe.
//

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use cstar_cfg::env::EnvStore;
use cstar_cfg::system::SystemManager;
use cstar_exe::handler::JobHandle;
use cstar_sim::simulation::Simulation;
use cstar_tsk::retrieval;
use specifications::blueprint::Blueprint;
use specifications::dates::parse_datetime;
use specifications::status::StepStatus;
use specifications::workplan::{OverrideValue, Step, Workplan};

use crate::dag::TaskGraph;
pub use crate::errors::OrchestrateError as Error;
use crate::record::{workplan_digest, JobRecord, RunLock, StepRecord, OUTPUTS_DIR, SCRIPTS_DIR};
use crate::transform::{split_step, SplitFrequency};


/***** CONSTANTS *****/
/// How long the run loop waits between scheduler polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// The application name of the do-nothing test step (it runs `hostname`).
pub const SLEEP_APPLICATION: &str = "sleep";





/***** LIBRARY *****/
/// Everything a workplan run needs besides the plan itself.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The directory run-ID directories live under (`$CSTAR_OUTDIR`).
    pub outdir        : PathBuf,
    /// The directory relative blueprint paths resolve against (usually the
    /// workplan file's own directory).
    pub workplan_dir  : PathBuf,
    /// Reset a conflicting job record instead of refusing.
    pub force         : bool,
    /// The account jobs are charged to, when submitting to a scheduler.
    pub account       : Option<String>,
    /// The queue jobs go to, when submitting to a scheduler.
    pub queue         : Option<String>,
    /// The walltime requested per job.
    pub walltime      : Option<String>,
    /// How long to wait between scheduler polls.
    pub poll_interval : Duration,
}

impl RunConfig {
    /// A config with default polling, no overrides and no force.
    pub fn new(outdir: impl Into<PathBuf>, workplan_dir: impl Into<PathBuf>) -> Self {
        Self {
            outdir        : outdir.into(),
            workplan_dir  : workplan_dir.into(),
            force         : false,
            account       : None,
            queue         : None,
            walltime      : None,
            poll_interval : DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What a finished (or failed) run looks like to the caller.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// The run-ID this outcome belongs to.
    pub run_id        : String,
    /// The final status of every step.
    pub statuses      : BTreeMap<String, StepStatus>,
    /// Whether every step completed successfully.
    pub all_completed : bool,
}



/// Runs (or resumes) the given workplan under the given run-ID.
///
/// The same command with the same run-ID is idempotent: a finished run
/// reads its record, sees every step terminal and returns immediately; an
/// interrupted run re-attaches to its still-live handlers and carries on.
/// A different workplan under the same run-ID is a conflict unless
/// `config.force` is set.
///
/// # Errors
/// This function errors on planning/record trouble, or on the first step
/// whose launch fails (after marking it failed and its dependents skipped,
/// and persisting that).
pub async fn run(
    workplan: &Workplan,
    run_id: impl AsRef<str>,
    config: &RunConfig,
    store: &mut EnvStore,
    system: &SystemManager,
) -> Result<RunOutcome, Error> {
    let run_id: &str = run_id.as_ref();
    info!("Running workplan '{}' under run-ID '{}'", workplan.name, run_id);

    // Apply the time-splitting transform when it is switched on
    let run_dir: PathBuf = config.outdir.join(run_id);
    let workplan: Workplan = match SplitFrequency::from_env()? {
        Some(freq) => transform_workplan(workplan, freq, &run_dir, config)?,
        None       => workplan.clone(),
    };
    let graph: TaskGraph = TaskGraph::new(&workplan)?;

    // Open the run's state
    let digest: String = workplan_digest(&workplan).map_err(|err| Error::PlanError{ err: crate::errors::PlanError::WorkplanError{ err } })?;
    let mut record: JobRecord = JobRecord::open_or_create(&run_dir, run_id, &workplan, digest, config.force)?;
    let _lock: RunLock = RunLock::acquire(&run_dir, run_id)?;
    record.save(&run_dir)?;

    // Live handlers and first-sightings of terminal statuses
    let mut handlers: HashMap<String, JobHandle> = HashMap::new();
    let mut terminal_seen: HashMap<String, StepStatus> = HashMap::new();

    loop {
        observe_running_steps(&graph, &mut record, &mut handlers, &mut terminal_seen);

        // Submit everything that became ready, in declaration order
        let frontier: Vec<&Step> = graph.ready_frontier(&record.statuses());
        for step in frontier {
            debug!("Step '{}' is ready; launching", step.name);
            match launch_step(step, run_id, &run_dir, config, store, system).await {
                Ok(handle) => {
                    let step_record: &mut StepRecord = record.steps.get_mut(&step.name).unwrap();
                    step_record.status = StepStatus::from(match &handle {
                        JobHandle::Local(_) => specifications::status::ExecutionStatus::Running,
                        _                   => specifications::status::ExecutionStatus::Pending,
                    });
                    step_record.handler = Some(handle.record());
                    step_record.output_path = Some(handle.output_file().into());
                    step_record.script_path = handle.script_path().map(PathBuf::from);
                    step_record.submitted_at = Some(chrono::Local::now().naive_local());
                    archive_script(&handle, &run_dir);
                    handlers.insert(step.name.clone(), handle);

                    // The handler id must be on disk before anything else happens
                    record.save(&run_dir)?;
                },
                Err(err) => {
                    warn!("Launching step '{}' of run '{}' failed: {}", step.name, run_id, err);
                    mark_failed(&graph, &mut record, &step.name);
                    record.save(&run_dir)?;
                    return Err(err);
                },
            }
        }

        record.save(&run_dir)?;
        if record.all_terminal() { break; }
        tokio::time::sleep(config.poll_interval).await;
    }

    let outcome: RunOutcome = RunOutcome {
        run_id        : run_id.into(),
        statuses      : record.steps.iter().map(|(name, r)| (name.clone(), r.status)).collect(),
        all_completed : record.all_completed(),
    };
    info!(
        "Workplan '{}' run '{}' finished: {}",
        workplan.name,
        run_id,
        if outcome.all_completed { "all steps completed" } else { "not all steps completed" },
    );
    Ok(outcome)
}



/// Cancels every non-terminal handler recorded under the given run
/// directory and marks the matching steps cancelled.
///
/// # Errors
/// This function errors if the record cannot be loaded or saved. Handler
/// cancels themselves are best-effort.
pub fn cancel(run_dir: impl Into<PathBuf>) -> Result<JobRecord, Error> {
    let run_dir: PathBuf = run_dir.into();
    let mut record: JobRecord = JobRecord::load(run_dir.join(crate::record::RECORD_FILE))?;

    for (name, step_record) in record.steps.iter_mut() {
        if step_record.status.is_terminal() { continue; }
        if let Some(mut handle) = step_record.handler.as_ref().and_then(|r| r.rehydrate()) {
            match handle.cancel() {
                Ok(true)  => info!("Cancelled step '{}'", name),
                Ok(false) => debug!("Step '{}' had nothing to cancel", name),
                Err(err)  => warn!("Failed to cancel step '{}': {}", name, err),
            }
        }
        if step_record.status != StepStatus::Unsubmitted {
            step_record.status = StepStatus::Cancelled;
            step_record.finished_at = Some(chrono::Local::now().naive_local());
        }
    }

    record.save(&run_dir)?;
    Ok(record)
}



/// Folds fresh scheduler observations into the record.
///
/// A terminal status is only committed after two consecutive consistent
/// readings; a single observation around a state transition is not treated
/// as authoritative.
fn observe_running_steps(
    graph: &TaskGraph,
    record: &mut JobRecord,
    handlers: &mut HashMap<String, JobHandle>,
    terminal_seen: &mut HashMap<String, StepStatus>,
) {
    let names: Vec<String> = record.steps.keys().cloned().collect();
    for name in names {
        let current: StepStatus = record.steps.get(&name).unwrap().status;
        if current.is_terminal() || current == StepStatus::Unsubmitted { continue; }

        // Make sure we have a live handle (re-attach on resume)
        if !handlers.contains_key(&name) {
            let rehydrated: Option<JobHandle> = record.steps.get(&name).unwrap().handler.as_ref().and_then(|r| r.rehydrate());
            match rehydrated {
                Some(handle) => {
                    debug!("Re-attached to handler of step '{}' (id {:?})", name, handle.id());
                    handlers.insert(name.clone(), handle);
                },
                None => {
                    warn!("Step '{}' has no re-attachable handler; marking it failed", name);
                    mark_failed(graph, record, &name);
                    continue;
                },
            }
        }

        let observed: StepStatus = StepStatus::from(handlers.get_mut(&name).unwrap().status());
        if observed.is_terminal() {
            // Commit only on the second consistent reading
            if terminal_seen.get(&name) == Some(&observed) {
                let step_record: &mut StepRecord = record.steps.get_mut(&name).unwrap();
                step_record.status = observed;
                step_record.finished_at = Some(chrono::Local::now().naive_local());
                handlers.remove(&name);
                terminal_seen.remove(&name);
                info!("Step '{}' is {}", name, observed);

                if observed != StepStatus::Completed {
                    skip_dependents(graph, record, &name);
                }
            } else {
                debug!("Step '{}' observed {} once; awaiting confirmation", name, observed);
                terminal_seen.insert(name.clone(), observed);
            }
        } else {
            terminal_seen.remove(&name);
            if observed != StepStatus::Unsubmitted {
                record.steps.get_mut(&name).unwrap().status = observed;
            }
        }
    }
}

/// Marks the given step failed and skips everything downstream of it.
fn mark_failed(graph: &TaskGraph, record: &mut JobRecord, name: &str) {
    if let Some(step_record) = record.steps.get_mut(name) {
        step_record.status = StepStatus::Failed;
        step_record.finished_at = Some(chrono::Local::now().naive_local());
    }
    skip_dependents(graph, record, name);
}

/// Marks every not-yet-submitted transitive dependent of the given step as skipped.
fn skip_dependents(graph: &TaskGraph, record: &mut JobRecord, name: &str) {
    for dependent in graph.transitive_dependents(name) {
        if let Some(step_record) = record.steps.get_mut(dependent) {
            if step_record.status == StepStatus::Unsubmitted {
                info!("Skipping step '{}' (dependency '{}' did not complete)", dependent, name);
                step_record.status = StepStatus::Skipped;
                step_record.finished_at = Some(chrono::Local::now().naive_local());
            }
        }
    }
}

/// Copies a freshly-submitted handler's script into the run's
/// `submit_scripts/` directory, best-effort.
fn archive_script(handle: &JobHandle, run_dir: &std::path::Path) {
    if let Some(script_path) = handle.script_path() {
        if script_path.exists() {
            if let Some(file_name) = script_path.file_name() {
                if let Err(err) = std::fs::copy(script_path, run_dir.join(SCRIPTS_DIR).join(file_name)) {
                    warn!("Failed to archive submission script '{}': {}", script_path.display(), err);
                }
            }
        }
    }
}



/// Applies the time-splitting transform to every simulation step of the plan.
fn transform_workplan(workplan: &Workplan, freq: SplitFrequency, run_dir: &std::path::Path, config: &RunConfig) -> Result<Workplan, Error> {
    let mut res: Workplan = workplan.clone();
    let blueprints_dir: PathBuf = run_dir.join("transformed_blueprints");

    for step in workplan.steps.clone() {
        if step.application == SLEEP_APPLICATION { continue; }
        let bp_path: PathBuf = resolve_blueprint_path(&step.blueprint, config);
        let blueprint: Blueprint = Blueprint::from_path(&bp_path).map_err(|err| Error::BlueprintError{ step: step.name.clone(), err })?;

        // Restart files are predicted with the same directory convention
        // `launch_step()` stages simulations under
        res = split_step(&res, &step.name, &blueprint, freq, &blueprints_dir, run_dir.join(OUTPUTS_DIR)).map_err(Error::from)?;
    }
    Ok(res)
}

/// Resolves a step's blueprint reference against the workplan directory.
fn resolve_blueprint_path(blueprint: &str, config: &RunConfig) -> PathBuf {
    let path: PathBuf = PathBuf::from(blueprint);
    if path.is_absolute() { path } else { config.workplan_dir.join(path) }
}



/// Launches one step: materializes its simulation (or the do-nothing test
/// command), drives it to submission and returns the live handler.
async fn launch_step(
    step: &Step,
    run_id: &str,
    run_dir: &std::path::Path,
    config: &RunConfig,
    store: &mut EnvStore,
    system: &SystemManager,
) -> Result<JobHandle, Error> {
    let step_dir: PathBuf = run_dir.join(OUTPUTS_DIR).join(&step.name);
    if let Err(err) = std::fs::create_dir_all(&step_dir) {
        return Err(Error::RecordError{ err: crate::errors::RecordError::DirCreateError{ path: step_dir, err } });
    }

    // The test application skips the whole simulation machinery
    if step.application == SLEEP_APPLICATION {
        let mut handle: JobHandle = JobHandle::local("hostname", step_dir.clone(), step_dir.join(format!("{}.out", step.name)));
        handle.submit().map_err(|err| Error::ExecuteError{ run_id: run_id.into(), step: step.name.clone(), err })?;
        return Ok(handle);
    }

    // Fetch-or-resolve the blueprint
    let bp_path: PathBuf = if step.blueprint.starts_with("http://") || step.blueprint.starts_with("https://") {
        let target: PathBuf = run_dir.join(format!("{}.blueprint.yaml", step.name));
        retrieval::fetch_file(&step.blueprint, &target, None)
            .await
            .map_err(|err| Error::BlueprintFetchError{ step: step.name.clone(), err })?
    } else {
        resolve_blueprint_path(&step.blueprint, config)
    };
    let mut blueprint: Blueprint = Blueprint::from_path(&bp_path).map_err(|err| Error::BlueprintError{ step: step.name.clone(), err })?;

    // Apply the blueprint overrides
    let (start_date, end_date): (NaiveDateTime, NaiveDateTime) = apply_overrides(&mut blueprint, step)?;

    // Drive the simulation up to submission
    let sim_err = |err| Error::SimulationError{ run_id: run_id.into(), step: step.name.clone(), err };
    let mut simulation: Simulation = Simulation::from_blueprint(&blueprint, &step_dir, start_date, end_date).map_err(sim_err)?;
    simulation.setup(store, system).await.map_err(sim_err)?;
    simulation.build(system).map_err(sim_err)?;
    simulation.pre_run().map_err(sim_err)?;
    simulation
        .run(system, config.account.as_deref(), config.walltime.as_deref(), config.queue.as_deref(), None)
        .map_err(sim_err)?;
    simulation.persist().map_err(sim_err)?;

    // The simulation keeps its record on disk; the orchestrator owns the live handle
    Ok(simulation.handler.take().unwrap())
}

/// Applies a step's blueprint overrides, returning the effective simulation
/// date range (the blueprint's validity window unless overridden).
fn apply_overrides(blueprint: &mut Blueprint, step: &Step) -> Result<(NaiveDateTime, NaiveDateTime), Error> {
    let mut start_date: NaiveDateTime = blueprint.valid_date_range.start_date;
    let mut end_date: NaiveDateTime = blueprint.valid_date_range.end_date;

    for (key, value) in &step.blueprint_overrides {
        match (key.as_str(), value) {
            ("name", OverrideValue::Str(name)) => { blueprint.name = name.clone(); },
            ("start_date", OverrideValue::Str(raw)) => {
                start_date = parse_datetime(raw).map_err(|err| Error::IllegalOverride{ step: step.name.clone(), key: key.clone(), reason: err.to_string() })?;
            },
            ("end_date", OverrideValue::Str(raw)) => {
                end_date = parse_datetime(raw).map_err(|err| Error::IllegalOverride{ step: step.name.clone(), key: key.clone(), reason: err.to_string() })?;
            },
            ("name" | "start_date" | "end_date", _) => {
                return Err(Error::IllegalOverride{ step: step.name.clone(), key: key.clone(), reason: "expected a string value".into() });
            },
            (other, _) => {
                warn!("Ignoring unrecognized blueprint override '{}' on step '{}'", other, step.name);
            },
        }
    }

    Ok((start_date, end_date))
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use cstar_cfg::system::profile_for;

    fn test_setup(dir: &std::path::Path) -> (RunConfig, EnvStore, SystemManager) {
        let mut config = RunConfig::new(dir.join("out"), dir);
        config.poll_interval = Duration::from_millis(50);
        let store = EnvStore::open(dir.join(".cstar.env")).unwrap();
        let system = SystemManager::with_profile(profile_for("linux_x86_64").unwrap());
        (config, store, system)
    }

    fn sleep_workplan() -> Workplan {
        Workplan::from_yaml(
            "name: wp\ndescription: three test jobs\nsteps:\n  - name: job1\n    application: sleep\n    blueprint: ./a.yaml\n  - name: job2\n    application: sleep\n    blueprint: ./b.yaml\n    depends_on: [job1]\n  - name: job3\n    application: sleep\n    blueprint: ./c.yaml\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dag_order_is_honored_and_all_complete() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut store, system) = test_setup(dir.path());
        let wp = sleep_workplan();

        let outcome = run(&wp, "r1", &config, &mut store, &system).await.unwrap();
        assert!(outcome.all_completed);
        assert_eq!(outcome.statuses.len(), 3);

        // job2 only ever submitted after job1 finished
        let record = JobRecord::load(config.outdir.join("r1").join(crate::record::RECORD_FILE)).unwrap();
        let job1 = record.steps.get("job1").unwrap();
        let job2 = record.steps.get("job2").unwrap();
        assert!(job2.submitted_at.unwrap() >= job1.finished_at.unwrap());
        // job3 was independent and needed no such wait
        assert!(record.steps.get("job3").unwrap().submitted_at.is_some());
    }

    #[tokio::test]
    async fn rerunning_a_finished_run_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut store, system) = test_setup(dir.path());
        let wp = sleep_workplan();

        run(&wp, "r1", &config, &mut store, &system).await.unwrap();
        let record_before = JobRecord::load(config.outdir.join("r1").join(crate::record::RECORD_FILE)).unwrap();

        // Same command, same run-ID: nothing is resubmitted
        let outcome = run(&wp, "r1", &config, &mut store, &system).await.unwrap();
        assert!(outcome.all_completed);
        let record_after = JobRecord::load(config.outdir.join("r1").join(crate::record::RECORD_FILE)).unwrap();
        assert_eq!(record_after.steps.get("job1").unwrap().submitted_at, record_before.steps.get("job1").unwrap().submitted_at);
    }

    #[tokio::test]
    async fn different_plan_same_run_id_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut store, system) = test_setup(dir.path());

        run(&sleep_workplan(), "r1", &config, &mut store, &system).await.unwrap();

        let mut other = sleep_workplan();
        other.steps[2].depends_on = vec!["job2".into()];
        let res = run(&other, "r1", &config, &mut store, &system).await;
        assert!(matches!(res, Err(Error::RecordError{ err: crate::errors::RecordError::RunIdConflict{ .. } })));

        // With force, the record resets and the run goes through
        let mut forced = config.clone();
        forced.force = true;
        run(&other, "r1", &forced, &mut store, &system).await.unwrap();
    }

    #[tokio::test]
    async fn failed_launch_skips_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut store, system) = test_setup(dir.path());

        // job1 is a real simulation step whose blueprint does not exist
        let wp = Workplan::from_yaml(
            "name: wp\ndescription: broken first step\nsteps:\n  - name: job1\n    application: roms_marbl\n    blueprint: ./missing.yaml\n  - name: job2\n    application: sleep\n    blueprint: ./b.yaml\n    depends_on: [job1]\n",
        )
        .unwrap();

        let res = run(&wp, "r1", &config, &mut store, &system).await;
        assert!(res.is_err());

        let record = JobRecord::load(config.outdir.join("r1").join(crate::record::RECORD_FILE)).unwrap();
        assert_eq!(record.steps.get("job1").unwrap().status, StepStatus::Failed);
        assert_eq!(record.steps.get("job2").unwrap().status, StepStatus::Skipped);
    }

    #[test]
    fn overrides_narrow_the_dates() {
        let mut blueprint = Blueprint::from_yaml(
            r#"
ROMSSimulation:
  name: base
  valid_date_range:
    start_date: "2012-01-01 00:00:00"
    end_date: "2012-12-31 00:00:00"
  base_model:
    source_repo: https://example.com/roms.git
    checkout_target: main
  discretization:
    n_procs_x: 1
    n_procs_y: 1
    time_step: 60
"#,
        )
        .unwrap();
        let mut step = sleep_workplan().steps[0].clone();
        step.blueprint_overrides.insert("start_date".into(), OverrideValue::Str("2012-03-01 00:00:00".into()));
        step.blueprint_overrides.insert("name".into(), OverrideValue::Str("renamed".into()));

        let (start, end) = apply_overrides(&mut blueprint, &step).unwrap();
        assert_eq!(start, parse_datetime("2012-03-01 00:00:00").unwrap());
        assert_eq!(end, parse_datetime("2012-12-31 00:00:00").unwrap());
        assert_eq!(blueprint.name, "renamed");

        // A non-string date is rejected
        step.blueprint_overrides.insert("end_date".into(), OverrideValue::Num(5.0));
        assert!(matches!(apply_overrides(&mut blueprint, &step), Err(Error::IllegalOverride{ .. })));
    }
}
