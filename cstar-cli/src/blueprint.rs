//  BLUEPRINT.rs
//    by Lut99
//
//  Created:
//    23 Apr 2024, 11:05:48
//  Last edited:
//    12 Dec 2024, 13:30:21
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the `cstar blueprint ...` commands: schema-checking a
//!   blueprint, and running a single-simulation blueprint end to end.
//

use std::path::{Path, PathBuf};

use console::style;
use dialoguer::Confirm;
use log::{debug, info};

use cstar_cfg::env::EnvStore;
use cstar_cfg::spec::clobber_working_dir;
use cstar_cfg::system::SystemManager;
use cstar_sim::simulation::{Simulation, STATE_FILE};
use specifications::blueprint::Blueprint;
use specifications::status::ExecutionStatus;

use crate::errors::CliError as Error;


/***** LIBRARY *****/
/// Checks whether the given file is a valid blueprint.
///
/// # Errors
/// This function errors (exit code 2) if it is not.
pub fn check(file: impl AsRef<Path>) -> Result<(), Error> {
    let file: &Path = file.as_ref();
    let blueprint: Blueprint = Blueprint::from_path(file).map_err(|err| Error::BlueprintError{ err })?;

    println!(
        "Blueprint {} ({}) is {}",
        style(&blueprint.name).bold().cyan(),
        file.display(),
        style("valid").bold().green(),
    );
    Ok(())
}



/// Runs the given single-simulation blueprint: setup, build, pre-run,
/// submit, follow the output, and join the results once it completes.
///
/// # Arguments
/// - `file`: The blueprint to run.
/// - `directory`: The simulation working directory (defaults to a directory
///   named after the blueprint, next to it).
/// - `account` / `queue` / `walltime`: Submission knobs, passed through to
///   the scheduler resolution.
///
/// # Errors
/// This function errors if any lifecycle phase fails, or the run itself
/// finishes in a non-completed state.
pub async fn run(
    file: impl AsRef<Path>,
    directory: Option<PathBuf>,
    account: Option<String>,
    queue: Option<String>,
    walltime: Option<String>,
) -> Result<(), Error> {
    let file: &Path = file.as_ref();

    let blueprint: Blueprint = Blueprint::from_path(file).map_err(|err| Error::BlueprintError{ err })?;
    let directory: PathBuf = directory.unwrap_or_else(|| {
        file.parent().unwrap_or_else(|| Path::new(".")).join(&blueprint.name)
    });
    prepare_directory(&directory)?;

    let system: SystemManager = SystemManager::detect().map_err(|err| Error::SystemError{ err })?;
    let mut store: EnvStore = EnvStore::open_default().map_err(|err| Error::StoreError{ err })?;
    debug!("Running blueprint '{}' on system '{}'", blueprint.name, system.name());

    // The full simulated period is the blueprint's validity window
    let mut simulation: Simulation = Simulation::from_blueprint(
        &blueprint,
        &directory,
        blueprint.valid_date_range.start_date,
        blueprint.valid_date_range.end_date,
    )
    .map_err(|err| Error::SimulationError{ err })?;

    let sim_err = |err| Error::SimulationError{ err };
    println!("{} simulation {}...", style("Setting up").bold(), style(&simulation.name).bold().cyan());
    simulation.setup(&mut store, &system).await.map_err(sim_err)?;
    println!("{} model...", style("Building").bold());
    simulation.build(&system).map_err(sim_err)?;
    simulation.pre_run().map_err(sim_err)?;

    let id: String = simulation
        .run(&system, account.as_deref(), walltime.as_deref(), queue.as_deref(), None)
        .map_err(sim_err)?;
    simulation.persist().map_err(sim_err)?;
    println!("{} as job {}", style("Submitted").bold().green(), style(&id).bold());

    // Follow the output until the job is done, then join the results
    let handler = simulation.handler.as_mut().unwrap();
    handler.updates(0).await.map_err(|err| Error::ExecuteError{ err })?;
    let status: ExecutionStatus = handler.status();
    info!("Job {} finished with status {}", id, status);

    if status == ExecutionStatus::Completed {
        let joined: Vec<PathBuf> = simulation.post_run().map_err(sim_err)?;
        simulation.persist().map_err(sim_err)?;
        println!("{} ({} joined output file(s))", style("Done").bold().green(), joined.len());
        Ok(())
    } else {
        simulation.persist().map_err(sim_err)?;
        Err(Error::SimulationError{
            err : cstar_sim::errors::SimulationError::WrongState {
                name      : simulation.name.clone(),
                operation : "finish",
                state     : status.to_string(),
                expected  : "completed",
            },
        })
    }
}



/// Makes sure the target working directory can be used, honoring
/// `$CSTAR_CLOBBER_WORKING_DIR`.
///
/// A directory holding a simulation state file whose handler might still be
/// live is never clobbered silently; neither is anything when the clobber
/// flag is off.
fn prepare_directory(directory: &Path) -> Result<(), Error> {
    if !directory.exists() { return Ok(()); }

    if !clobber_working_dir() {
        return Err(Error::DirectoryExists{ path: directory.into() });
    }
    if directory.join(STATE_FILE).exists() {
        // Restoring tells us whether a handler is still attached to this directory
        if let Ok(old) = Simulation::restore(directory) {
            if old.handler.is_some() {
                return Err(Error::DirectoryLive{ path: directory.into() });
            }
        }
    }

    let confirmed: bool = Confirm::new()
        .with_prompt(format!("Remove existing working directory '{}'?", directory.display()))
        .default(false)
        .interact()
        .unwrap_or(false);
    if !confirmed {
        return Err(Error::DirectoryExists{ path: directory.into() });
    }
    match std::fs::remove_dir_all(directory) {
        Ok(_)    => Ok(()),
        Err(err) => Err(Error::ClobberError{ path: directory.into(), err }),
    }
}
