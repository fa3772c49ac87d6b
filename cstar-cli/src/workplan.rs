//  WORKPLAN.rs
//    by Lut99
//
//  Created:
//    24 Apr 2024, 09:12:30
//  Last edited:
//    12 Dec 2024, 13:55:14
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the `cstar workplan ...` commands: checking a workplan,
//!   running it under a run-ID and showing the state of an existing run.
//

use std::path::{Path, PathBuf};

use console::style;

use cstar_cfg::env::EnvStore;
use cstar_cfg::spec::{cstar_outdir, ENV_CSTAR_RUNID};
use cstar_cfg::system::SystemManager;
use cstar_plr::dag::TaskGraph;
use cstar_plr::orchestrator::{self, RunConfig, RunOutcome};
use cstar_plr::record::{JobRecord, RECORD_FILE};
use specifications::workplan::Workplan;

use crate::errors::CliError as Error;


/***** HELPER FUNCTIONS *****/
/// Resolves the effective run-ID: the explicit argument, else `$CSTAR_RUNID`.
fn resolve_run_id(run_id: Option<String>) -> Result<String, Error> {
    match run_id.or_else(|| std::env::var(ENV_CSTAR_RUNID).ok()) {
        Some(run_id) if !run_id.is_empty() => Ok(run_id),
        _ => Err(Error::MissingRunId),
    }
}





/***** LIBRARY *****/
/// Checks whether the given file is a valid workplan with a DAG of steps.
///
/// # Errors
/// This function errors (exit code 2) if it is not.
pub fn check(file: impl AsRef<Path>) -> Result<(), Error> {
    let file: &Path = file.as_ref();
    let workplan: Workplan = Workplan::from_path(file).map_err(|err| Error::WorkplanError{ err })?;
    TaskGraph::new(&workplan).map_err(|err| Error::PlanError{ err })?;

    println!(
        "Workplan {} ({}) is {} ({} step(s))",
        style(&workplan.name).bold().cyan(),
        file.display(),
        style("valid").bold().green(),
        workplan.steps.len(),
    );
    Ok(())
}



/// Runs (or resumes) the given workplan under the given run-ID.
///
/// # Errors
/// This function errors if validation, planning or any step fails; a
/// completed-but-not-all-successful run also counts as a failure.
pub async fn run(
    file: impl AsRef<Path>,
    run_id: Option<String>,
    force: bool,
    account: Option<String>,
    queue: Option<String>,
    walltime: Option<String>,
) -> Result<(), Error> {
    let file: &Path = file.as_ref();
    let run_id: String = resolve_run_id(run_id)?;

    let workplan: Workplan = Workplan::from_path(file).map_err(|err| Error::WorkplanError{ err })?;
    let system: SystemManager = SystemManager::detect().map_err(|err| Error::SystemError{ err })?;
    let mut store: EnvStore = EnvStore::open_default().map_err(|err| Error::StoreError{ err })?;

    let mut config: RunConfig = RunConfig::new(
        cstar_outdir().map_err(|err| Error::StoreError{ err })?,
        file.parent().unwrap_or_else(|| Path::new(".")),
    );
    config.force = force;
    config.account = account;
    config.queue = queue;
    config.walltime = walltime;

    println!(
        "{} workplan {} under run-ID {}",
        style("Running").bold(),
        style(&workplan.name).bold().cyan(),
        style(&run_id).bold(),
    );
    let outcome: RunOutcome = orchestrator::run(&workplan, &run_id, &config, &mut store, &system)
        .await
        .map_err(|err| Error::OrchestrateError{ err })?;

    for (name, status) in &outcome.statuses {
        println!("  {} {}", style(format!("{:<24}", name)).bold(), status);
    }
    if outcome.all_completed {
        println!("{}", style("All steps completed").bold().green());
        Ok(())
    } else {
        Err(Error::StepsNotCompleted{ run_id: outcome.run_id })
    }
}



/// Prints the state of the given run-ID's job record.
///
/// # Errors
/// This function errors if there is no such record.
pub fn status(run_id: Option<String>) -> Result<(), Error> {
    let run_id: String = resolve_run_id(run_id)?;
    let path: PathBuf = cstar_outdir().map_err(|err| Error::StoreError{ err })?.join(&run_id).join(RECORD_FILE);
    if !path.exists() {
        return Err(Error::NoSuchRun{ run_id, path });
    }
    let record: JobRecord = JobRecord::load(&path).map_err(|err| Error::OrchestrateError{ err: err.into() })?;

    println!("Run {} ({} step(s)):", style(&record.run_id).bold().cyan(), record.steps.len());
    for (name, step) in &record.steps {
        let id: String = step.handler.as_ref().and_then(|h| h.id.clone()).unwrap_or_else(|| String::from("-"));
        println!(
            "  {} {:<12} job={} submitted={} finished={}",
            style(format!("{:<24}", name)).bold(),
            step.status.to_string(),
            id,
            step.submitted_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_else(|| String::from("-")),
            step.finished_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_else(|| String::from("-")),
        );
    }
    Ok(())
}



/// Cancels every non-terminal step of the given run-ID.
///
/// # Errors
/// This function errors if there is no such record or it cannot be updated.
pub fn cancel(run_id: Option<String>) -> Result<(), Error> {
    let run_id: String = resolve_run_id(run_id)?;
    let run_dir: PathBuf = cstar_outdir().map_err(|err| Error::StoreError{ err })?.join(&run_id);
    if !run_dir.join(RECORD_FILE).exists() {
        return Err(Error::NoSuchRun{ run_id, path: run_dir.join(RECORD_FILE) });
    }

    let record: JobRecord = orchestrator::cancel(&run_dir).map_err(|err| Error::OrchestrateError{ err })?;
    println!("{} run {}", style("Cancelled").bold().yellow(), style(&record.run_id).bold().cyan());
    Ok(())
}
