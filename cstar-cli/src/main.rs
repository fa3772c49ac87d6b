//  MAIN.rs
//    by Lut99
//
//  Created:
//    23 Apr 2024, 09:58:46
//  Last edited:
//    12 Dec 2024, 14:20:37
//  Auto updated?
//    Yes
//
//  Description:
//!   Entrypoint to the `cstar` binary.
//

#[macro_use]
extern crate human_panic;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use console::style;
use dotenvy::dotenv;
use log::LevelFilter;

use cstar_cli::errors::CliError;
use cstar_cli::{blueprint, env, workplan};


/***** ARGUMENTS *****/
#[derive(Parser)]
#[clap(name = "cstar", about = "The C-Star reproducible-simulation orchestrator.")]
struct Cli {
    #[clap(short, long, action, global = true, help = "Enable debug logging")]
    debug       : bool,
    #[clap(subcommand)]
    sub_command : SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    #[clap(name = "blueprint", about = "Blueprint-related commands.")]
    Blueprint {
        #[clap(subcommand)]
        subcommand : BlueprintSubcommand,
    },

    #[clap(name = "workplan", about = "Workplan-related commands.")]
    Workplan {
        #[clap(subcommand)]
        subcommand : WorkplanSubcommand,
    },

    #[clap(name = "env", about = "Environment-related commands.")]
    Env {
        #[clap(subcommand)]
        subcommand : EnvSubcommand,
    },
}

/// Defines the subcommands for the blueprint subcommand.
#[derive(Parser)]
enum BlueprintSubcommand {
    #[clap(name = "check", about = "Validates the given blueprint file. Exits 0 when valid, 2 when not.")]
    Check {
        #[clap(name = "FILE", help = "Path to the blueprint to check")]
        file : PathBuf,
    },

    #[clap(name = "run", about = "Runs the given single-simulation blueprint on this machine (or its scheduler).")]
    Run {
        #[clap(name = "FILE", help = "Path to the blueprint to run")]
        file      : PathBuf,
        #[clap(short = 'o', long, help = "The simulation working directory (defaults to a directory named after the blueprint, next to it)")]
        directory : Option<PathBuf>,
        #[clap(short, long, help = "The account to charge the job to (defaults to $CSTAR_SLURM_ACCOUNT or the PBS equivalent)")]
        account   : Option<String>,
        #[clap(short, long, help = "The queue to submit to (defaults to $CSTAR_SLURM_QUEUE or the system's primary queue)")]
        queue     : Option<String>,
        #[clap(short, long, help = "The walltime to request, as HH:MM:SS (defaults to the queue maximum)")]
        walltime  : Option<String>,
    },
}

/// Defines the subcommands for the workplan subcommand.
#[derive(Parser)]
enum WorkplanSubcommand {
    #[clap(name = "check", about = "Validates the given workplan file, including DAG checks. Exits 0 when valid, 2 when not.")]
    Check {
        #[clap(name = "FILE", help = "Path to the workplan to check")]
        file : PathBuf,
    },

    #[clap(name = "run", about = "Runs (or resumes) the given workplan under a run-ID. Idempotent per run-ID.")]
    Run {
        #[clap(name = "FILE", help = "Path to the workplan to run")]
        file     : PathBuf,
        #[clap(short, long, help = "The run-ID keying this run's state (defaults to $CSTAR_RUNID)")]
        run_id   : Option<String>,
        #[clap(short, long, action, help = "Reset the run's state when the workplan changed under the same run-ID")]
        force    : bool,
        #[clap(short, long, help = "The account to charge jobs to")]
        account  : Option<String>,
        #[clap(short, long, help = "The queue to submit jobs to")]
        queue    : Option<String>,
        #[clap(short, long, help = "The walltime to request per job, as HH:MM:SS")]
        walltime : Option<String>,
    },

    #[clap(name = "status", about = "Shows the step states of an existing run.")]
    Status {
        #[clap(short, long, help = "The run-ID to inspect (defaults to $CSTAR_RUNID)")]
        run_id : Option<String>,
    },

    #[clap(name = "cancel", about = "Cancels every non-terminal step of an existing run.")]
    Cancel {
        #[clap(short, long, help = "The run-ID to cancel (defaults to $CSTAR_RUNID)")]
        run_id : Option<String>,
    },
}

/// Defines the subcommands for the env subcommand.
#[derive(Parser)]
enum EnvSubcommand {
    #[clap(name = "show", about = "Prints the effective configuration for this machine.")]
    Show {},
}





/***** ENTRYPOINT *****/
#[tokio::main]
async fn main() {
    // Parse the CLI arguments
    setup_panic!();
    dotenv().ok();
    let options = Cli::parse();

    // Prepare the logger
    let mut logger = env_logger::builder();
    logger.format_module_path(false);
    let level: LevelFilter = if options.debug { LevelFilter::Debug } else { LevelFilter::Warn };
    for module in ["cstar_cli", "cstar_cfg", "cstar_tsk", "cstar_exe", "cstar_sim", "cstar_plr", "specifications"] {
        logger.filter_module(module, level);
    }
    logger.init();

    // Run the command
    let res: Result<(), CliError> = match options.sub_command {
        SubCommand::Blueprint{ subcommand } => match subcommand {
            BlueprintSubcommand::Check{ file } => blueprint::check(file),
            BlueprintSubcommand::Run{ file, directory, account, queue, walltime } => {
                blueprint::run(file, directory, account, queue, walltime).await
            },
        },

        SubCommand::Workplan{ subcommand } => match subcommand {
            WorkplanSubcommand::Check{ file } => workplan::check(file),
            WorkplanSubcommand::Run{ file, run_id, force, account, queue, walltime } => {
                workplan::run(file, run_id, force, account, queue, walltime).await
            },
            WorkplanSubcommand::Status{ run_id } => workplan::status(run_id),
            WorkplanSubcommand::Cancel{ run_id } => workplan::cancel(run_id),
        },

        SubCommand::Env{ subcommand } => match subcommand {
            EnvSubcommand::Show{} => env::show(),
        },
    };

    // Map the outcome to the exit-code contract
    if let Err(err) = res {
        eprintln!("{}: {}", style("ERROR").bold().red(), err);
        process::exit(err.exit_code());
    }
}
