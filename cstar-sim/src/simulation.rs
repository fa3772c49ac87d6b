//  SIMULATION.rs
//    by Lut99
//
//  Created:
//    10 Apr 2024, 13:44:21
//  Last edited:
//    12 Dec 2024, 10:26:17
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the simulation: one fully-specified, runnable model
//!   configuration and its lifecycle, `setup` through `post_run`, with
//!   persistence so a later interpreter session can restore it and
//!   re-attach to a still-live scheduler job.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::NaiveDateTime;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use cstar_cfg::env::EnvStore;
use cstar_cfg::spec::{cstar_home, nprocs_post};
use cstar_cfg::system::SystemManager;
use cstar_exe::handler::{HandlerRecord, JobHandle};
use cstar_exe::script::default_job_name;
use cstar_exe::spec::{resolve_submission, JobRequest, SubmitPolicy};
use cstar_tsk::code::AdditionalCode;
use cstar_tsk::codebase::ExternalCodeBase;
use cstar_tsk::dataset::{DatasetKind, InputDataset};
use specifications::blueprint::{Blueprint, Component, DatasetRole, Discretization};
use specifications::dates::{format_datetime, DateRange};

pub use crate::errors::SimulationError as Error;
use crate::join::join_outputs;
use crate::settings::RuntimeSettings;


/***** CONSTANTS *****/
/// The file a simulation persists itself to, inside its working directory.
pub const STATE_FILE: &str = ".cstar-simulation.json";

/// The subdirectory input datasets are staged into.
pub const INPUT_DATASETS_DIR: &str = "input_datasets";

/// The subdirectory runtime code (namelists) is staged into.
pub const NAMELISTS_DIR: &str = "namelists";

/// The subdirectory compile-time code is staged into.
pub const SOURCE_CODE_DIR: &str = "additional_source_code";

/// The subdirectory job output lands in.
pub const OUTPUT_DIR: &str = "output";

/// The version of the persisted state schema.
pub const STATE_SCHEMA_VERSION: u32 = 1;





/***** LIBRARY *****/
/// The phases a simulation moves through. Earlier states are only reachable
/// again by restoring a persisted simulation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Constructed,
    SetupOk,
    Built,
    Ready,
    Running,
    Finished,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use LifecycleState::*;
        match self {
            Constructed => write!(f, "constructed"),
            SetupOk     => write!(f, "setup-ok"),
            Built       => write!(f, "built"),
            Ready       => write!(f, "ready"),
            Running     => write!(f, "running"),
            Finished    => write!(f, "finished"),
        }
    }
}



/// The persisted form of a [`Simulation`].
#[derive(Clone, Debug, Deserialize, Serialize)]
struct SimulationRecord {
    schema_version    : u32,
    name              : String,
    directory         : PathBuf,
    valid_date_range  : DateRange,
    start_date        : NaiveDateTime,
    end_date          : NaiveDateTime,
    codebases         : Vec<ExternalCodeBase>,
    runtime_code      : Option<AdditionalCode>,
    compile_time_code : Option<AdditionalCode>,
    datasets          : Vec<InputDataset>,
    discretization    : Discretization,
    state             : LifecycleState,
    executable        : Option<PathBuf>,
    built_ranks       : Option<u32>,
    handler           : Option<HandlerRecord>,
}



/// One fully-specified, runnable configuration of the ocean model.
#[derive(Debug)]
pub struct Simulation {
    /// The user-friendly name, taken from the blueprint.
    pub name              : String,
    /// The working root of this simulation.
    pub directory         : PathBuf,
    /// The period the blueprint is valid for.
    pub valid_date_range  : DateRange,
    /// Where this run starts.
    pub start_date        : NaiveDateTime,
    /// Where this run ends.
    pub end_date          : NaiveDateTime,
    /// The model codebases this run needs installed.
    pub codebases         : Vec<ExternalCodeBase>,
    /// Runtime namelists.
    pub runtime_code      : Option<AdditionalCode>,
    /// Compile-time source modifications.
    pub compile_time_code : Option<AdditionalCode>,
    /// The input datasets, one per occupied role.
    pub datasets          : Vec<InputDataset>,
    /// The rank grid and time step.
    pub discretization    : Discretization,

    /// Where we are in the lifecycle.
    pub state       : LifecycleState,
    /// The compiled model executable, once built.
    pub executable  : Option<PathBuf>,
    /// The rank count the executable was built for, once built.
    pub built_ranks : Option<u32>,
    /// The current execution handler, while one exists.
    pub handler     : Option<JobHandle>,
}

impl Simulation {
    /// Builds a simulation from a parsed blueprint.
    ///
    /// # Arguments
    /// - `blueprint`: The parsed (and validated) blueprint document.
    /// - `directory`: The working root to materialize everything under.
    /// - `start_date` / `end_date`: The period to actually simulate; both
    ///   must lie within the blueprint's validity window.
    ///
    /// # Errors
    /// This function errors if the dates are inverted or fall outside the
    /// window, or the blueprint has no ROMS component.
    pub fn from_blueprint(
        blueprint: &Blueprint,
        directory: impl Into<PathBuf>,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
    ) -> Result<Self, Error> {
        let directory: PathBuf = directory.into();

        if start_date > end_date {
            return Err(Error::InvertedDates{ name: blueprint.name.clone(), start: format_datetime(&start_date), end: format_datetime(&end_date) });
        }
        for date in [&start_date, &end_date] {
            if !blueprint.valid_date_range.contains(date) {
                return Err(Error::DateOutOfRange{ name: blueprint.name.clone(), date: format_datetime(date), valid: blueprint.valid_date_range.to_string() });
            }
        }

        let roms: &Component = match blueprint.roms_component() {
            Some(roms) => roms,
            None       => { return Err(Error::NoRomsComponent{ name: blueprint.name.clone() }); },
        };
        // Blueprint validation guarantees the ROMS component has one
        let discretization: Discretization = roms.discretization.unwrap();

        let mut codebases: Vec<ExternalCodeBase> = Vec::with_capacity(2);
        for component in &blueprint.components {
            codebases.push(ExternalCodeBase::from_ref(component.component_type, &component.base_model));
        }

        let datasets: Vec<InputDataset> = roms.datasets().into_iter().map(|(role, dsref)| InputDataset::from_ref(role, dsref)).collect();

        Ok(Self {
            name              : blueprint.name.clone(),
            directory,
            valid_date_range  : blueprint.valid_date_range,
            start_date,
            end_date,
            codebases,
            runtime_code      : roms.runtime_code.as_ref().map(AdditionalCode::from_ref),
            compile_time_code : roms.compile_time_code.as_ref().map(AdditionalCode::from_ref),
            datasets,
            discretization,
            state             : LifecycleState::Constructed,
            executable        : None,
            built_ranks       : None,
            handler           : None,
        })
    }



    /// The date range this run covers.
    #[inline]
    pub fn date_range(&self) -> DateRange {
        // `from_blueprint()` and `restore()` guarantee start <= end
        DateRange::new(self.start_date, self.end_date).unwrap()
    }

    /// The number of time steps this run integrates over.
    #[inline]
    pub fn n_time_steps(&self) -> u64 {
        let span: u64 = (self.end_date - self.start_date).num_seconds().max(0) as u64;
        span / self.discretization.time_step.max(1) as u64
    }

    /// Ensures codebases are installed, stages runtime and compile-time
    /// code, and materializes every input dataset.
    ///
    /// Idempotent: files that are already present with matching hashes are
    /// not fetched (or even touched) again.
    ///
    /// # Errors
    /// This function errors if any install, staging or materialization step
    /// fails, or a dataset does not cover the requested date range.
    pub async fn setup(&mut self, store: &mut EnvStore, system: &SystemManager) -> Result<(), Error> {
        info!("Setting up simulation '{}' in '{}'", self.name, self.directory.display());

        for dir in [self.directory.clone(), self.directory.join(OUTPUT_DIR)] {
            if !dir.exists() {
                if let Err(err) = std::fs::create_dir_all(&dir) {
                    return Err(Error::DirCreateError{ path: dir, err });
                }
            }
        }

        // Install the model codebases (no-ops when already configured)
        let codebase_root: PathBuf = cstar_home().map_err(|err| Error::StoreError{ err })?.join("codebases");
        for codebase in &self.codebases {
            let target: PathBuf = codebase.local_root(store).unwrap_or_else(|| codebase_root.join(&codebase.name));
            if let Err(err) = codebase.get(store, system, &target) {
                return Err(Error::CodebaseError{ name: self.name.clone(), err });
            }
        }

        // Stage the additional code
        if let Some(code) = &mut self.runtime_code {
            if let Err(err) = code.get(self.directory.join(NAMELISTS_DIR)).await {
                return Err(Error::CodeStageError{ name: self.name.clone(), err });
            }
        }
        if let Some(code) = &mut self.compile_time_code {
            if let Err(err) = code.get(self.directory.join(SOURCE_CODE_DIR)).await {
                return Err(Error::CodeStageError{ name: self.name.clone(), err });
            }
        }

        // Stage and materialize the datasets, checking their ranges
        let range: DateRange = self.date_range();
        let dataset_dir: PathBuf = self.directory.join(INPUT_DATASETS_DIR);
        for dataset in &mut self.datasets {
            if let Err(err) = dataset.assert_covers(&range) {
                return Err(Error::DatasetError{ name: self.name.clone(), err });
            }
            if let Err(err) = dataset.get(&dataset_dir, false).await {
                return Err(Error::DatasetError{ name: self.name.clone(), err });
            }
            if dataset.needs_materialization() {
                if let Err(err) = dataset.materialize(&range) {
                    return Err(Error::DatasetError{ name: self.name.clone(), err });
                }
            }
        }

        if self.state < LifecycleState::SetupOk { self.state = LifecycleState::SetupOk; }
        info!("Simulation '{}' set up", self.name);
        Ok(())
    }

    /// Compiles the model against the staged compile-time code.
    ///
    /// Refuses to build when the rank layout changed since the last build;
    /// call [`Simulation::clean()`] first in that case.
    ///
    /// # Errors
    /// This function errors if setup has not happened, the layout is stale,
    /// or compilation fails (the captured build log is in the error).
    pub fn build(&mut self, system: &SystemManager) -> Result<(), Error> {
        if self.state < LifecycleState::SetupOk {
            return Err(Error::WrongState{ name: self.name.clone(), operation: "build", state: self.state.to_string(), expected: "setup-ok or later" });
        }
        if let Some(built_for) = self.built_ranks {
            if built_for != self.discretization.n_ranks() {
                return Err(Error::StaleBuild{ name: self.name.clone(), built_for, requested: self.discretization.n_ranks() });
            }
        }

        let build_dir: PathBuf = self.directory.join(SOURCE_CODE_DIR);
        let mut cmd: Command = Command::new("make");
        cmd.arg(format!("COMPILER={}", system.compiler().as_make_arg()));
        cmd.current_dir(&build_dir);
        let pretty: String = format!("make COMPILER={} (in {})", system.compiler().as_make_arg(), build_dir.display());

        info!("Building simulation '{}'...", self.name);
        let output: Output = match cmd.output() {
            Ok(output) => output,
            Err(err)   => { return Err(Error::CommandLaunchError{ name: self.name.clone(), command: pretty, err }); },
        };
        if !output.status.success() {
            let mut log: String = String::from_utf8_lossy(&output.stdout).into_owned();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::BuildError{ name: self.name.clone(), command: pretty, log });
        }

        self.executable = Some(build_dir.join("roms"));
        self.built_ranks = Some(self.discretization.n_ranks());
        if self.state < LifecycleState::Built { self.state = LifecycleState::Built; }
        info!("Simulation '{}' built for {} ranks", self.name, self.discretization.n_ranks());
        Ok(())
    }

    /// Drops the build products so the simulation can be rebuilt for a new
    /// rank layout.
    pub fn clean(&mut self) {
        self.executable = None;
        self.built_ranks = None;
        if self.state > LifecycleState::SetupOk { self.state = LifecycleState::SetupOk; }
    }

    /// Renders the runtime-settings file into the working directory and
    /// partitions the input datasets across ranks when the layout needs it.
    ///
    /// # Errors
    /// This function errors if the simulation is not built, no settings
    /// template was staged, or partitioning fails.
    pub fn pre_run(&mut self) -> Result<(), Error> {
        if self.state < LifecycleState::Built {
            return Err(Error::WrongState{ name: self.name.clone(), operation: "pre-run", state: self.state.to_string(), expected: "built" });
        }

        // Load the staged template
        let template: PathBuf = self.settings_template()?;
        let mut settings: RuntimeSettings = RuntimeSettings::from_path(&template).map_err(|err| Error::SettingsError{ name: self.name.clone(), err })?;
        self.substitute_settings(&mut settings);
        let in_file: PathBuf = self.in_file();
        settings.to_path(&in_file).map_err(|err| Error::SettingsError{ name: self.name.clone(), err })?;
        debug!("Rendered runtime settings to '{}'", in_file.display());

        // Split the inputs across ranks when there is more than one
        if self.discretization.n_ranks() > 1 {
            self.partition_inputs()?;
        }

        if self.state < LifecycleState::Ready { self.state = LifecycleState::Ready; }
        Ok(())
    }

    /// Submits the model run and returns the handler id.
    ///
    /// On a scheduler host, account/queue/walltime resolve from the
    /// arguments, then the `CSTAR_*` variables, then queue defaults; a
    /// missing account is a configuration error. The returned handler is
    /// already submitted.
    ///
    /// # Errors
    /// This function errors if the simulation is not ready, resolution
    /// fails, or submission fails.
    pub fn run(
        &mut self,
        system: &SystemManager,
        account_key: Option<&str>,
        walltime: Option<&str>,
        queue_name: Option<&str>,
        job_name: Option<&str>,
    ) -> Result<String, Error> {
        if self.state < LifecycleState::Ready {
            return Err(Error::WrongState{ name: self.name.clone(), operation: "run", state: self.state.to_string(), expected: "ready" });
        }
        let executable: &Path = match self.executable.as_deref() {
            Some(executable) => executable,
            None => { return Err(Error::WrongState{ name: self.name.clone(), operation: "run", state: self.state.to_string(), expected: "built (no executable)" }); },
        };

        let n_ranks: u32 = self.discretization.n_ranks();
        let commands: String = format!("{} -n {} {} {}", system.mpi_exec_prefix(), n_ranks, executable.display(), self.in_file().display());
        let job_name: String = job_name.map(String::from).unwrap_or_else(|| default_job_name(&chrono::Local::now().naive_local()));

        let mut handler: JobHandle = match system.scheduler() {
            Some(spec) => {
                let policy: SubmitPolicy = resolve_submission(spec, system.name(), account_key, queue_name, walltime)
                    .map_err(|err| Error::ExecuteError{ name: self.name.clone(), err: err.into() })?;
                let request: JobRequest = JobRequest {
                    commands,
                    account     : policy.account,
                    queue       : policy.queue,
                    walltime    : policy.walltime,
                    n_ranks,
                    job_name    : job_name.clone(),
                    script_path : self.directory.join(format!("{}.sh", job_name)),
                    run_path    : self.directory.clone(),
                    output_file : self.directory.join(OUTPUT_DIR).join(format!("{}.out", job_name)),
                };
                JobHandle::scheduled(request, system).map_err(|err| Error::ExecuteError{ name: self.name.clone(), err })?
            },
            None => JobHandle::local(commands, self.directory.clone(), self.directory.join(OUTPUT_DIR).join(format!("{}.out", job_name))),
        };

        let id: String = handler.submit().map_err(|err| Error::ExecuteError{ name: self.name.clone(), err })?;
        info!("Simulation '{}' submitted as job '{}' (id {})", self.name, job_name, id);
        self.handler = Some(handler);
        self.state = LifecycleState::Running;
        Ok(id)
    }

    /// Joins the partitioned per-rank output files into whole-domain files,
    /// removing the intermediates on success.
    ///
    /// Uses at most `$CSTAR_NPROCS_POST` workers.
    ///
    /// # Errors
    /// This function errors if the simulation never ran or joining fails.
    pub fn post_run(&mut self) -> Result<Vec<PathBuf>, Error> {
        if self.state < LifecycleState::Running {
            return Err(Error::WrongState{ name: self.name.clone(), operation: "post-run", state: self.state.to_string(), expected: "running" });
        }

        let joined: Vec<PathBuf> = join_outputs(self.directory.join(OUTPUT_DIR), nprocs_post())
            .map_err(|err| Error::JoinError{ name: self.name.clone(), err })?;
        self.state = LifecycleState::Finished;
        Ok(joined)
    }



    /// Writes the full simulation state (including the handler id) to
    /// `<directory>/.cstar-simulation.json`.
    ///
    /// # Errors
    /// This function errors if serialization or the write fails.
    pub fn persist(&self) -> Result<(), Error> {
        let record: SimulationRecord = SimulationRecord {
            schema_version    : STATE_SCHEMA_VERSION,
            name              : self.name.clone(),
            directory         : self.directory.clone(),
            valid_date_range  : self.valid_date_range,
            start_date        : self.start_date,
            end_date          : self.end_date,
            codebases         : self.codebases.clone(),
            runtime_code      : self.runtime_code.clone(),
            compile_time_code : self.compile_time_code.clone(),
            datasets          : self.datasets.clone(),
            discretization    : self.discretization,
            state             : self.state,
            executable        : self.executable.clone(),
            built_ranks       : self.built_ranks,
            handler           : self.handler.as_ref().map(|h| h.record()),
        };

        let raw: String = match serde_json::to_string_pretty(&record) {
            Ok(raw)  => raw,
            Err(err) => { return Err(Error::SerializeError{ name: self.name.clone(), err }); },
        };
        let path: PathBuf = self.directory.join(STATE_FILE);
        match std::fs::write(&path, raw) {
            Ok(_)    => Ok(()),
            Err(err) => Err(Error::PersistError{ path, err }),
        }
    }

    /// Rehydrates a simulation from the state file in the given directory,
    /// re-attaching to any still-live scheduler job by re-querying its
    /// state.
    ///
    /// # Errors
    /// This function errors if the state file cannot be read or parsed.
    pub fn restore(directory: impl AsRef<Path>) -> Result<Self, Error> {
        let directory: &Path = directory.as_ref();
        let path: PathBuf = directory.join(STATE_FILE);

        let raw: String = match std::fs::read_to_string(&path) {
            Ok(raw)  => raw,
            Err(err) => { return Err(Error::RestoreReadError{ path, err }); },
        };
        let record: SimulationRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err)   => { return Err(Error::RestoreParseError{ path, err }); },
        };

        let mut handler: Option<JobHandle> = record.handler.as_ref().and_then(HandlerRecord::rehydrate);
        if let Some(handle) = &mut handler {
            let status = handle.status();
            debug!("Re-attached to job {:?}; scheduler reports {}", handle.id(), status);
        }

        Ok(Self {
            name              : record.name,
            directory         : record.directory,
            valid_date_range  : record.valid_date_range,
            start_date        : record.start_date,
            end_date          : record.end_date,
            codebases         : record.codebases,
            runtime_code      : record.runtime_code,
            compile_time_code : record.compile_time_code,
            datasets          : record.datasets,
            discretization    : record.discretization,
            state             : record.state,
            executable        : record.executable,
            built_ranks       : record.built_ranks,
            handler,
        })
    }

    /// Derives a follow-on simulation that continues this one: it starts
    /// where this one ends, and its initial conditions are this one's
    /// restart output.
    ///
    /// # Errors
    /// This function errors if the new end date is not after this run's end
    /// or outside the validity window.
    pub fn restart(&self, new_end_date: NaiveDateTime, directory: impl Into<PathBuf>) -> Result<Self, Error> {
        if new_end_date <= self.end_date {
            return Err(Error::InvertedDates{ name: self.name.clone(), start: format_datetime(&self.end_date), end: format_datetime(&new_end_date) });
        }
        if !self.valid_date_range.contains(&new_end_date) {
            return Err(Error::DateOutOfRange{ name: self.name.clone(), date: format_datetime(&new_end_date), valid: self.valid_date_range.to_string() });
        }

        let mut datasets: Vec<InputDataset> = self.datasets.clone();
        let restart_source: cstar_tsk::spec::DataSource = cstar_tsk::spec::DataSource {
            location         : cstar_tsk::spec::Location::Path{ path: self.restart_file() },
            checkout_target  : None,
            subdir           : None,
            file_hash        : None,
            valid_date_range : None,
            working_path     : None,
        };
        match datasets.iter_mut().find(|ds| ds.role == DatasetRole::InitialConditions) {
            Some(initial) => {
                initial.kind = DatasetKind::NetcdfFile;
                initial.source = restart_source;
                initial.materialized = vec![];
            },
            None => datasets.push(InputDataset {
                role         : DatasetRole::InitialConditions,
                kind         : DatasetKind::NetcdfFile,
                source       : restart_source,
                materialized : vec![],
            }),
        }

        Ok(Self {
            name              : self.name.clone(),
            directory         : directory.into(),
            valid_date_range  : self.valid_date_range,
            start_date        : self.end_date,
            end_date          : new_end_date,
            codebases         : self.codebases.clone(),
            runtime_code      : self.runtime_code.clone(),
            compile_time_code : self.compile_time_code.clone(),
            datasets,
            discretization    : self.discretization,
            state             : LifecycleState::Constructed,
            executable        : None,
            built_ranks       : None,
            handler           : None,
        })
    }

    /// The restart file this simulation's run leaves behind.
    #[inline]
    pub fn restart_file(&self) -> PathBuf {
        self.directory.join(OUTPUT_DIR).join(format!("{}_rst.nc", self.name))
    }

    /// The rendered runtime-settings file of this simulation.
    #[inline]
    pub fn in_file(&self) -> PathBuf {
        self.directory.join(format!("{}.in", self.name))
    }



    /// Finds the staged runtime-settings template.
    fn settings_template(&self) -> Result<PathBuf, Error> {
        let code: &AdditionalCode = match &self.runtime_code {
            Some(code) => code,
            None       => { return Err(Error::NoSettingsTemplate{ name: self.name.clone() }); },
        };
        for file in &code.files {
            if file.ends_with(".in_TEMPLATE") || file.ends_with(".in") {
                if let Some(path) = code.staged_file(file) {
                    return Ok(path);
                }
            }
        }
        Err(Error::NoSettingsTemplate{ name: self.name.clone() })
    }

    /// Substitutes this simulation's dates, paths and discretization into
    /// the parsed settings.
    fn substitute_settings(&self, settings: &mut RuntimeSettings) {
        // time_stepping: NTIMES and dt change, the trailing knobs stay
        let mut stepping: Vec<String> = settings.values("time_stepping").unwrap_or_else(|_| vec!["0".into(), "0".into(), "60".into(), "1".into()]);
        while stepping.len() < 2 { stepping.push("0".into()); }
        stepping[0] = self.n_time_steps().to_string();
        stepping[1] = self.discretization.time_step.to_string();
        settings.set_values("time_stepping", &stepping);

        // Dataset paths, per role
        let mut forcing: Vec<String> = Vec::new();
        for dataset in &self.datasets {
            let paths: Vec<String> = dataset.materialized.iter().map(|p| p.display().to_string()).collect();
            if paths.is_empty() { continue; }
            match dataset.role {
                DatasetRole::ModelGrid         => settings.set_values("grid", &paths[..1.min(paths.len())]),
                DatasetRole::InitialConditions => settings.set_value_lines("initial", &[vec!["1".to_string()], paths].concat()),
                _                              => forcing.extend(paths),
            }
        }
        if !forcing.is_empty() {
            settings.set_value_lines("forcing", &forcing);
        }

        // MARBL settings files, when the template has the section
        if settings.section("MARBL_biogeochemistry").is_some() {
            if let Some(code) = &self.runtime_code {
                let marbl: Vec<String> = code
                    .files
                    .iter()
                    .filter(|f| f.starts_with("marbl_"))
                    .filter_map(|f| code.staged_file(f).map(|p| p.display().to_string()))
                    .collect();
                if !marbl.is_empty() {
                    settings.set_value_lines("MARBL_biogeochemistry", &marbl);
                }
            }
        }

        settings.set_values("output_root_name", &[self.name.clone()]);
    }

    /// Partitions every materialized input file across the rank grid with
    /// the model's `partit` tool.
    fn partition_inputs(&self) -> Result<(), Error> {
        let files: Vec<PathBuf> = self.datasets.iter().flat_map(|ds| ds.materialized.iter().cloned()).collect();
        if files.is_empty() { return Ok(()); }

        let mut cmd: Command = Command::new("partit");
        cmd.arg(self.discretization.n_procs_x.to_string());
        cmd.arg(self.discretization.n_procs_y.to_string());
        for file in &files {
            cmd.arg(file);
        }
        cmd.current_dir(self.directory.join(INPUT_DATASETS_DIR));
        let pretty: String = format!("partit {} {} <{} files>", self.discretization.n_procs_x, self.discretization.n_procs_y, files.len());

        info!("Partitioning {} input file(s) across {} ranks", files.len(), self.discretization.n_ranks());
        let output: Output = match cmd.output() {
            Ok(output) => output,
            Err(err)   => { return Err(Error::CommandLaunchError{ name: self.name.clone(), command: pretty, err }); },
        };
        if !output.status.success() {
            let mut log: String = String::from_utf8_lossy(&output.stdout).into_owned();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::PartitionError{ name: self.name.clone(), command: pretty, log });
        }
        Ok(())
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use specifications::blueprint::PlaceholderContext;
    use specifications::dates::parse_datetime;

    /// A minimal single-rank blueprint whose resources all live in `origin`.
    fn test_blueprint(origin: &Path) -> Blueprint {
        let raw: &str = r#"
ROMSSimulation:
  name: tiny
  valid_date_range:
    start_date: "2012-01-01 12:00:00"
    end_date: "2012-12-31 12:00:00"
  base_model:
    source_repo: https://github.com/CESR-lab/ucla-roms.git
    checkout_target: main
  discretization:
    n_procs_x: 1
    n_procs_y: 1
    time_step: 60
  runtime_code:
    location: <additional_code_location>
    subdir: namelists
    files: [roms.in_TEMPLATE]
  model_grid:
    location: <input_datasets_location>/roms_grd.nc
  initial_conditions:
    location: <input_datasets_location>/roms_ini.nc
"#;
        let ctx = PlaceholderContext::for_origin(origin.to_string_lossy());
        Blueprint::from_yaml(ctx.resolve(raw)).unwrap()
    }

    fn seed_resources(origin: &Path) {
        std::fs::create_dir_all(origin.join("namelists")).unwrap();
        std::fs::write(
            origin.join("namelists/roms.in_TEMPLATE"),
            "title:\n     tiny run\n\ntime_stepping: NTIMES   dt[sec]  NDTFAST  NINFO\n               0        0        60       1\n\ngrid:  filename\n     placeholder\n\ninitial: NRREC  filename\n          1\n     placeholder\n",
        )
        .unwrap();
        std::fs::write(origin.join("roms_grd.nc"), b"grid bytes").unwrap();
        std::fs::write(origin.join("roms_ini.nc"), b"initial bytes").unwrap();
    }

    #[test]
    fn dates_outside_window_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bp = test_blueprint(dir.path());

        // S5: a start before the window fails construction
        let res = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2011-12-31 12:00:00").unwrap(),
            parse_datetime("2012-02-01 00:00:00").unwrap(),
        );
        assert!(matches!(res, Err(Error::DateOutOfRange{ .. })));

        let res = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2012-02-01 00:00:00").unwrap(),
            parse_datetime("2012-01-01 13:00:00").unwrap(),
        );
        assert!(matches!(res, Err(Error::InvertedDates{ .. })));
    }

    #[test]
    fn time_step_count_follows_the_dates() {
        let dir = tempfile::tempdir().unwrap();
        let bp = test_blueprint(dir.path());
        let sim = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-01-02 12:00:00").unwrap(),
        )
        .unwrap();
        // One day at 60s steps
        assert_eq!(sim.n_time_steps(), 24 * 60);
    }

    #[tokio::test]
    async fn setup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        seed_resources(dir.path());
        // Keep all C-Star state inside the test sandbox
        std::env::set_var("CSTAR_HOME", dir.path().join("cstar_home"));

        let bp = test_blueprint(dir.path());
        let mut sim = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-01-02 12:00:00").unwrap(),
        )
        .unwrap();
        // Drop the codebases so setup needs no network or compiler
        sim.codebases.clear();

        let mut store = EnvStore::open(dir.path().join(".cstar.env")).unwrap();
        let system = SystemManager::with_profile(cstar_cfg::system::profile_for("linux_x86_64").unwrap());

        sim.setup(&mut store, &system).await.unwrap();
        assert_eq!(sim.state, LifecycleState::SetupOk);

        let staged_grid = dir.path().join("sim/input_datasets/roms_grd.nc");
        assert!(staged_grid.exists());
        let mtime = std::fs::metadata(&staged_grid).unwrap().modified().unwrap();

        // Second setup must not modify anything
        sim.setup(&mut store, &system).await.unwrap();
        assert_eq!(std::fs::metadata(&staged_grid).unwrap().modified().unwrap(), mtime);
    }

    #[tokio::test]
    async fn lifecycle_enforces_order_and_rank_changes() {
        let dir = tempfile::tempdir().unwrap();
        seed_resources(dir.path());
        std::env::set_var("CSTAR_HOME", dir.path().join("cstar_home"));

        let bp = test_blueprint(dir.path());
        let mut sim = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-01-02 12:00:00").unwrap(),
        )
        .unwrap();
        sim.codebases.clear();

        let system = SystemManager::with_profile(cstar_cfg::system::profile_for("linux_x86_64").unwrap());

        // Build before setup is refused
        assert!(matches!(sim.build(&system), Err(Error::WrongState{ .. })));

        let mut store = EnvStore::open(dir.path().join(".cstar.env")).unwrap();
        sim.setup(&mut store, &system).await.unwrap();

        // Fake a successful build so pre_run can proceed without a compiler
        sim.executable = Some(dir.path().join("sim/roms"));
        sim.built_ranks = Some(1);
        sim.state = LifecycleState::Built;

        // A changed rank layout now refuses to rebuild without clean()
        sim.discretization.n_procs_x = 2;
        assert!(matches!(sim.build(&system), Err(Error::StaleBuild{ .. })));
        sim.discretization.n_procs_x = 1;

        sim.pre_run().unwrap();
        assert_eq!(sim.state, LifecycleState::Ready);

        // The rendered .in file has the real paths and step count
        let rendered = std::fs::read_to_string(sim.in_file()).unwrap();
        assert!(rendered.contains("roms_grd.nc"));
        assert!(rendered.contains("1440  60"));
        assert!(rendered.contains("output_root_name:\n     tiny"));
    }

    #[tokio::test]
    async fn persist_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        seed_resources(dir.path());
        std::env::set_var("CSTAR_HOME", dir.path().join("cstar_home"));

        let bp = test_blueprint(dir.path());
        let mut sim = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-01-02 12:00:00").unwrap(),
        )
        .unwrap();
        sim.codebases.clear();

        let mut store = EnvStore::open(dir.path().join(".cstar.env")).unwrap();
        let system = SystemManager::with_profile(cstar_cfg::system::profile_for("linux_x86_64").unwrap());
        sim.setup(&mut store, &system).await.unwrap();
        sim.persist().unwrap();

        let restored = Simulation::restore(dir.path().join("sim")).unwrap();
        assert_eq!(restored.name, "tiny");
        assert_eq!(restored.state, LifecycleState::SetupOk);
        assert_eq!(restored.start_date, sim.start_date);
        assert_eq!(restored.datasets.len(), 2);
        assert!(restored.handler.is_none());
    }

    #[test]
    fn restart_couples_to_the_restart_file() {
        let dir = tempfile::tempdir().unwrap();
        let bp = test_blueprint(dir.path());
        let sim = Simulation::from_blueprint(
            &bp,
            dir.path().join("sim"),
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-02-01 00:00:00").unwrap(),
        )
        .unwrap();

        let follow = sim.restart(parse_datetime("2012-03-01 00:00:00").unwrap(), dir.path().join("sim2")).unwrap();
        assert_eq!(follow.start_date, sim.end_date);
        assert_eq!(follow.state, LifecycleState::Constructed);

        let initial = follow.datasets.iter().find(|ds| ds.role == DatasetRole::InitialConditions).unwrap();
        assert_eq!(
            initial.source.location,
            cstar_tsk::spec::Location::Path{ path: sim.restart_file() },
        );

        // Continuing past the validity window is refused
        assert!(sim.restart(parse_datetime("2013-06-01 00:00:00").unwrap(), dir.path().join("sim3")).is_err());
    }
}
