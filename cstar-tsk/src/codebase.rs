//  CODEBASE.rs
//    by Lut99
//
//  Created:
//    27 Mar 2024, 14:03:50
//  Last edited:
//    11 Dec 2024, 13:20:35
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements installation of pinned external model codebases (UCLA-ROMS
//!   and MARBL): clone, checkout, compile, and record the install root in
//!   the environment store so later sessions skip the whole dance.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use cstar_cfg::env::EnvStore;
use cstar_cfg::spec::{codebase_root_var, fresh_codebases};
use cstar_cfg::system::SystemManager;
use specifications::blueprint::{CodeRepositoryRef, ComponentType};

pub use crate::errors::CodebaseError as Error;
use crate::retrieval::{self, RepoStatus};


/***** LIBRARY *****/
/// How an external codebase relates to what is (or is not) installed locally.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConfigStatus {
    /// The recorded root is a clone of the right remote at the right commit.
    Configured,
    /// The recorded root is a clone of the right remote at another commit.
    WrongCommit,
    /// The recorded root points at a clone of another remote.
    WrongRemote,
    /// No root is recorded, or it does not exist on disk.
    Absent,
}

impl Display for ConfigStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ConfigStatus::*;
        match self {
            Configured  => write!(f, "configured"),
            WrongCommit => write!(f, "wrong-commit"),
            WrongRemote => write!(f, "wrong-remote"),
            Absent      => write!(f, "absent"),
        }
    }
}



/// A pinned version of a model source repository, installable on demand.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExternalCodeBase {
    /// The short name of the model (`roms`, `marbl`); determines the
    /// `<NAME>_ROOT` variable and the build recipe.
    pub name            : String,
    /// The clone URL of the model source.
    pub source_repo     : String,
    /// The git ref to pin the install to.
    pub checkout_target : String,
}

impl ExternalCodeBase {
    /// Builds the codebase handle for the given blueprint component.
    pub fn from_ref(ctype: ComponentType, cref: &CodeRepositoryRef) -> Self {
        let name: &str = match ctype {
            ComponentType::Roms  => "roms",
            ComponentType::Marbl => "marbl",
        };
        Self {
            name            : name.into(),
            source_repo     : cref.source_repo.clone(),
            checkout_target : cref.checkout_target.clone(),
        }
    }

    /// The environment variable this codebase records its install root under.
    #[inline]
    pub fn root_env_var(&self) -> String { codebase_root_var(&self.name) }

    /// Returns the recorded install root, consulting the environment store
    /// first and the process environment second.
    pub fn local_root(&self, store: &EnvStore) -> Option<PathBuf> {
        let var: String = self.root_env_var();
        store
            .get(&var)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(&var).map(PathBuf::from))
    }

    /// Computes how the recorded install root (if any) relates to this
    /// codebase's pinned `(remote, ref)`.
    pub fn config_status(&self, store: &EnvStore) -> ConfigStatus {
        let root: PathBuf = match self.local_root(store) {
            Some(root) => root,
            None       => { return ConfigStatus::Absent; },
        };
        if !root.exists() { return ConfigStatus::Absent; }

        match retrieval::verify_local(&root, &self.source_repo, &self.checkout_target) {
            RepoStatus::Matches     => ConfigStatus::Configured,
            RepoStatus::WrongRef    => ConfigStatus::WrongCommit,
            RepoStatus::WrongRemote => ConfigStatus::WrongRemote,
            RepoStatus::NotARepo    => ConfigStatus::Absent,
        }
    }



    /// Installs the codebase at the given root: clone, checkout, compile,
    /// record.
    ///
    /// When the codebase is already [`ConfigStatus::Configured`] (and
    /// `$CSTAR_FRESH_CODEBASES` is unset), this returns immediately.
    ///
    /// # Errors
    /// This function errors if fetching fails, any build step exits non-zero
    /// (the captured build log is part of the error), or the root cannot be
    /// recorded in the store.
    pub fn get(&self, store: &mut EnvStore, system: &SystemManager, target_root: impl AsRef<Path>) -> Result<(), Error> {
        let target_root: &Path = target_root.as_ref();

        if self.config_status(store) == ConfigStatus::Configured && !fresh_codebases() {
            debug!("Codebase '{}' already configured; skipping install", self.name);
            return Ok(());
        }

        info!("Installing codebase '{}' at '{}' ({} @ {})", self.name, target_root.display(), self.source_repo, self.checkout_target);
        if let Err(err) = retrieval::fetch_repo(&self.source_repo, &self.checkout_target, target_root) {
            return Err(Error::RetrieveError{ name: self.name.clone(), err });
        }

        // Run the model's build steps with the system's compiler family
        let compiler: &str = system.compiler().as_make_arg();
        for (args, cwd) in self.build_recipe(compiler) {
            self.run_build_step(&args, &target_root.join(cwd))?;
        }

        // Remember where it lives for future sessions
        store.set(self.root_env_var(), target_root.to_string_lossy());
        if let Err(err) = store.save() {
            return Err(Error::StoreError{ name: self.name.clone(), err });
        }

        info!("Codebase '{}' installed", self.name);
        Ok(())
    }

    /// Returns the `make` invocations (arguments + working subdirectory)
    /// that build this model.
    fn build_recipe(&self, compiler: &str) -> Vec<(Vec<String>, PathBuf)> {
        match self.name.as_str() {
            // ROMS builds its NHMG library and then the Tools-Roms programs
            "roms" => vec![
                (vec!["nhmg".into(), format!("COMPILER={}", compiler)], PathBuf::from("Work")),
                (vec![format!("COMPILER={}", compiler)], PathBuf::from("Tools-Roms")),
            ],
            // MARBL builds its static library with MPI enabled
            "marbl" => vec![
                (vec![compiler.into(), "USEMPI=TRUE".into()], PathBuf::from("src")),
            ],
            // Unknown models get a bare `make` at the repository root
            _ => vec![
                (vec![format!("COMPILER={}", compiler)], PathBuf::new()),
            ],
        }
    }

    /// Runs a single `make` step, capturing its combined output.
    fn run_build_step(&self, args: &[String], cwd: &Path) -> Result<(), Error> {
        let mut cmd: Command = Command::new("make");
        cmd.args(args);
        cmd.current_dir(cwd);
        let pretty: String = format!("make {} (in {})", args.join(" "), cwd.display());
        debug!("Running build step: {}", pretty);

        let output: Output = match cmd.output() {
            Ok(output) => output,
            Err(err)   => { return Err(Error::BuildLaunchError{ name: self.name.clone(), command: pretty, err }); },
        };
        if !output.status.success() {
            let mut log: String = String::from_utf8_lossy(&output.stdout).into_owned();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::BuildError{ name: self.name.clone(), command: pretty, status: output.status, log });
        }
        Ok(())
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_env_vars_follow_the_name() {
        let roms = ExternalCodeBase {
            name            : "roms".into(),
            source_repo     : "https://github.com/CESR-lab/ucla-roms.git".into(),
            checkout_target : "main".into(),
        };
        assert_eq!(roms.root_env_var(), "ROMS_ROOT");
    }

    #[test]
    fn absent_without_recorded_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvStore::open(dir.path().join(".cstar.env")).unwrap();
        let marbl = ExternalCodeBase {
            name            : "marbl".into(),
            source_repo     : "https://github.com/marbl-ecosys/MARBL.git".into(),
            checkout_target : "marbl0.45.0".into(),
        };
        assert_eq!(marbl.config_status(&store), ConfigStatus::Absent);
    }

    #[test]
    fn recorded_but_missing_root_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EnvStore::open(dir.path().join(".cstar.env")).unwrap();
        store.set("ROMS_ROOT", dir.path().join("nowhere").to_string_lossy());
        let roms = ExternalCodeBase {
            name            : "roms".into(),
            source_repo     : "https://github.com/CESR-lab/ucla-roms.git".into(),
            checkout_target : "main".into(),
        };
        assert_eq!(roms.config_status(&store), ConfigStatus::Absent);
    }

    #[test]
    fn build_recipes_use_the_compiler_family() {
        let roms = ExternalCodeBase {
            name            : "roms".into(),
            source_repo     : "https://example.com/roms.git".into(),
            checkout_target : "main".into(),
        };
        let recipe = roms.build_recipe("intel");
        assert_eq!(recipe.len(), 2);
        assert_eq!(recipe[0].0, vec!["nhmg".to_string(), "COMPILER=intel".to_string()]);
        assert_eq!(recipe[1].1, PathBuf::from("Tools-Roms"));
    }
}
