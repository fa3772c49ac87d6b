//  CODE.rs
//    by Lut99
//
//  Created:
//    27 Mar 2024, 15:42:19
//  Last edited:
//    21 Nov 2024, 16:08:52
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements additional code: the ordered set of plain-text files
//!   (runtime namelists or compile-time source modifications) a simulation
//!   layers on top of a model's own defaults.
//

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use specifications::blueprint::AdditionalCodeRef;

pub use crate::errors::StageError as Error;
use crate::spec::DataSource;
use crate::stager;


/***** LIBRARY *****/
/// An ordered list of plain-text files plus the source they come from.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AdditionalCode {
    /// Where the files come from.
    pub source : DataSource,
    /// The file names, in order.
    pub files  : Vec<String>,
}

impl AdditionalCode {
    /// Builds the handle for the given blueprint reference.
    pub fn from_ref(cref: &AdditionalCodeRef) -> Self {
        Self {
            source : DataSource::from_code_ref(cref),
            files  : cref.files.clone(),
        }
    }

    /// Stages the files into the given directory.
    ///
    /// Repository sources go through the scratch clone cache; local sources
    /// are copied directly. Afterwards the staged directory is checked to
    /// contain exactly the listed files (the staging post-condition).
    ///
    /// # Errors
    /// This function errors if staging fails or a listed file is missing
    /// afterwards.
    pub async fn get(&mut self, target_dir: impl AsRef<Path>) -> Result<(), Error> {
        let target_dir: &Path = target_dir.as_ref();

        if self.source.location.is_remote() {
            stager::stage_repo_files(&mut self.source, &self.files, target_dir).await?;
        } else {
            stager::stage_local_files(&mut self.source, &self.files, target_dir)?;
        }
        stager::assert_staged(target_dir, &self.files)
    }

    /// Returns the directory the files were staged into, if staged.
    #[inline]
    pub fn working_path(&self) -> Option<&Path> { self.source.working_path() }

    /// Returns the staged path of the given file, if staged.
    pub fn staged_file(&self, name: impl AsRef<str>) -> Option<PathBuf> {
        let name: &str = name.as_ref();
        if !self.files.iter().any(|f| f == name) { return None; }
        self.source.working_path().map(|dir| dir.join(name))
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Location;

    #[tokio::test]
    async fn local_code_stages_and_agrees() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("blueprint_code");
        std::fs::create_dir_all(from.join("namelists")).unwrap();
        std::fs::write(from.join("namelists/roms.in_TEMPLATE"), b"title:\n  test\n").unwrap();
        std::fs::write(from.join("namelists/marbl_in"), b"ciso_on = .false.\n").unwrap();

        let mut code = AdditionalCode {
            source : DataSource {
                location         : Location::Path{ path: from },
                checkout_target  : None,
                subdir           : Some(PathBuf::from("namelists")),
                file_hash        : None,
                valid_date_range : None,
                working_path     : None,
            },
            files : vec!["roms.in_TEMPLATE".into(), "marbl_in".into()],
        };

        let target = dir.path().join("sim/namelists");
        code.get(&target).await.unwrap();
        assert_eq!(code.working_path(), Some(target.as_path()));
        assert_eq!(code.staged_file("marbl_in"), Some(target.join("marbl_in")));
        assert_eq!(code.staged_file("not_listed"), None);
    }

    #[tokio::test]
    async fn missing_listed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("blueprint_code");
        std::fs::create_dir_all(&from).unwrap();
        std::fs::write(from.join("present.opt"), b"x\n").unwrap();

        let mut code = AdditionalCode {
            source : DataSource {
                location         : Location::Path{ path: from },
                checkout_target  : None,
                subdir           : None,
                file_hash        : None,
                valid_date_range : None,
                working_path     : None,
            },
            files : vec!["present.opt".into(), "absent.opt".into()],
        };

        assert!(code.get(dir.path().join("sim/code")).await.is_err());
    }
}
