//  ENV.rs
//    by Lut99
//
//  Created:
//    24 Apr 2024, 10:33:19
//  Last edited:
//    12 Dec 2024, 14:08:51
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements `cstar env show`: the effective configuration as C-Star
//!   sees it, from host classification down to the persisted overrides.
//

use console::style;

use cstar_cfg::env::EnvStore;
use cstar_cfg::spec::{
    cstar_home, cstar_outdir, fresh_codebases, nprocs_post, ENV_CSTAR_ORCH_TRX_FREQ, ENV_CSTAR_RUNID, ENV_CSTAR_SLURM_ACCOUNT,
    ENV_CSTAR_SLURM_MAX_WALLTIME, ENV_CSTAR_SLURM_QUEUE,
};
use cstar_cfg::system::SystemManager;

use crate::errors::CliError as Error;


/***** LIBRARY *****/
/// Prints the effective configuration.
///
/// # Errors
/// This function errors if the host cannot be classified or the environment
/// store cannot be read.
pub fn show() -> Result<(), Error> {
    let system: SystemManager = SystemManager::detect().map_err(|err| Error::SystemError{ err })?;
    let store: EnvStore = EnvStore::open_default().map_err(|err| Error::StoreError{ err })?;

    println!("{}", style("System").bold());
    println!("  name            : {}", system.name());
    println!("  compiler        : {}", system.compiler());
    println!("  mpi exec prefix : {}", system.mpi_exec_prefix());
    match system.scheduler() {
        Some(spec) => {
            println!("  scheduler       : {}", spec.kind);
            for queue in &spec.queues {
                println!(
                    "    queue {:<12} max walltime {}{}",
                    queue.name,
                    queue.max_walltime.as_deref().unwrap_or("unknown"),
                    if queue.name == spec.primary_queue { " (primary)" } else { "" },
                );
            }
        },
        None => println!("  scheduler       : none (local processes)"),
    }

    println!("{}", style("Paths").bold());
    println!("  home   : {}", cstar_home().map_err(|err| Error::StoreError{ err })?.display());
    println!("  outdir : {}", cstar_outdir().map_err(|err| Error::StoreError{ err })?.display());

    println!("{}", style("Behavior").bold());
    println!("  post-run workers : {}", nprocs_post());
    println!("  fresh codebases  : {}", fresh_codebases());
    for var in [ENV_CSTAR_SLURM_ACCOUNT, ENV_CSTAR_SLURM_QUEUE, ENV_CSTAR_SLURM_MAX_WALLTIME, ENV_CSTAR_RUNID, ENV_CSTAR_ORCH_TRX_FREQ] {
        match std::env::var(var) {
            Ok(value) => println!("  {:<26} = {}", var, value),
            Err(_)    => println!("  {:<26} = {}", var, style("(unset)").dim()),
        }
    }

    println!("{} ({})", style("Environment store").bold(), store.path().display());
    if store.iter().count() == 0 {
        println!("  {}", style("(empty)").dim());
    }
    for (key, value) in store.iter() {
        println!("  {:<26} = {}", key, value);
    }

    Ok(())
}
