//  DATASET.rs
//    by Lut99
//
//  Created:
//    28 Mar 2024, 09:55:02
//  Last edited:
//    11 Dec 2024, 14:01:29
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements input datasets: ready netCDF files, or YAML recipes that
//!   the external grid/forcing generator turns into netCDF files. The
//!   generator is a black box; its failures surface with the recipe path,
//!   the requested range and whatever it printed.
//

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use cstar_cfg::spec::ENV_CSTAR_CMD_CONVERTER_OVERRIDE;
use specifications::blueprint::{DatasetRef, DatasetRole};
use specifications::dates::{format_datetime, DateRange};

pub use crate::errors::DatasetError as Error;
use crate::spec::DataSource;
use crate::stager;


/***** CONSTANTS *****/
/// The external generator invoked to materialize YAML recipes.
pub const DEFAULT_CONVERTER_CMD: &str = "roms-tools";





/***** LIBRARY *****/
/// The two things a dataset reference can point at.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// A ready-to-use netCDF file.
    NetcdfFile,
    /// A YAML recipe for the external grid/forcing generator.
    YamlRecipe,
}

/// One input dataset of a simulation, in a specific role.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InputDataset {
    /// The role this dataset plays (grid, initial conditions, a forcing, ...).
    pub role         : DatasetRole,
    /// Whether this is a ready file or a recipe.
    pub kind         : DatasetKind,
    /// Where the dataset comes from and where its working copy is.
    pub source       : DataSource,
    /// The netCDF files backing this dataset once materialized. For ready
    /// files this is the staged file itself; for recipes, the generator's
    /// outputs.
    pub materialized : Vec<PathBuf>,
}

impl InputDataset {
    /// Builds the dataset handle for the given blueprint reference.
    pub fn from_ref(role: DatasetRole, dsref: &DatasetRef) -> Self {
        let kind: DatasetKind = if dsref.is_recipe() { DatasetKind::YamlRecipe } else { DatasetKind::NetcdfFile };
        Self {
            role,
            kind,
            source       : DataSource::from_dataset_ref(dsref),
            materialized : vec![],
        }
    }

    /// Stages the dataset file (netCDF or recipe YAML) into the given directory.
    ///
    /// # Errors
    /// This function errors if staging fails; see [`stager::stage_file()`]
    /// for the idempotence and `force` semantics.
    pub async fn get(&mut self, target_dir: impl AsRef<Path>, force: bool) -> Result<(), Error> {
        let staged: PathBuf = stager::stage_file(&mut self.source, target_dir, force)
            .await
            .map_err(|err| Error::StageError{ location: self.source.location.to_string(), err })?;
        if self.kind == DatasetKind::NetcdfFile {
            self.materialized = vec![staged];
        }
        Ok(())
    }

    /// Returns whether this dataset still needs [`InputDataset::materialize()`]
    /// before a simulation can run.
    #[inline]
    pub fn needs_materialization(&self) -> bool {
        self.kind == DatasetKind::YamlRecipe && self.materialized.is_empty()
    }

    /// Materializes a YAML-recipe dataset over the given date range by
    /// invoking the external generator. Output netCDF files are written next
    /// to the recipe (never into a partitioned subdirectory) and recorded in
    /// `materialized`. Ready netCDF datasets are a no-op.
    ///
    /// # Errors
    /// This function errors if the dataset was not staged first, the
    /// generator fails (its output is captured into the error), or it
    /// produces no netCDF files.
    pub fn materialize(&mut self, range: &DateRange) -> Result<(), Error> {
        if self.kind == DatasetKind::NetcdfFile { return Ok(()); }
        let recipe: PathBuf = match self.source.working_path() {
            Some(path) => path.into(),
            None       => { return Err(Error::NotStaged{ location: self.source.location.to_string() }); },
        };
        let out_dir: PathBuf = recipe.parent().unwrap_or_else(|| Path::new(".")).into();

        // The override exists so tests can swap in a stub generator
        let program: String = env::var(ENV_CSTAR_CMD_CONVERTER_OVERRIDE).unwrap_or_else(|_| DEFAULT_CONVERTER_CMD.into());
        let mut cmd: Command = Command::new(&program);
        cmd.arg("generate");
        cmd.arg("--from-yaml").arg(&recipe);
        cmd.arg("--start-date").arg(format_datetime(&range.start_date));
        cmd.arg("--end-date").arg(format_datetime(&range.end_date));
        cmd.arg("--output-dir").arg(&out_dir);

        info!("Materializing recipe '{}' over {}...", recipe.display(), range);
        let output: Output = match cmd.output() {
            Ok(output) => output,
            Err(err)   => { return Err(Error::GeneratorLaunchError{ recipe, command: program, err }); },
        };
        if !output.status.success() {
            let mut log: String = String::from_utf8_lossy(&output.stdout).into_owned();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::GeneratorError{ recipe, range: range.to_string(), command: program, log });
        }

        // Everything the generator wrote next to the recipe under its stem is ours
        self.materialized = discover_outputs(&recipe, &out_dir)?;
        if self.materialized.is_empty() {
            return Err(Error::NoOutputs{ recipe });
        }
        debug!("Recipe '{}' materialized into {} file(s)", recipe.display(), self.materialized.len());
        Ok(())
    }

    /// Returns whether this dataset covers the given date range. Datasets
    /// without a declared range are assumed to cover everything.
    #[inline]
    pub fn covers(&self, range: &DateRange) -> bool {
        match &self.source.valid_date_range {
            Some(own) => own.encloses(range),
            None      => true,
        }
    }

    /// Asserts that this dataset covers the given date range.
    ///
    /// # Errors
    /// This function errors with the dataset's own range in the message when
    /// it does not.
    pub fn assert_covers(&self, range: &DateRange) -> Result<(), Error> {
        if self.covers(range) { return Ok(()); }
        Err(Error::RangeNotCovered {
            location  : self.source.location.to_string(),
            requested : range.to_string(),
            available : self.source.valid_date_range.map(|r| r.to_string()).unwrap_or_else(|| "nothing".into()),
        })
    }
}



/// Lists the netCDF files that share the given recipe's stem.
fn discover_outputs(recipe: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let stem: String = recipe.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

    let entries = match std::fs::read_dir(out_dir) {
        Ok(entries) => entries,
        Err(err)    => { return Err(Error::DirReadError{ path: out_dir.into(), err }); },
    };
    let mut res: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let path: PathBuf = entry.path();
        let name: String = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&stem) && name.ends_with(".nc") {
            res.push(path);
        }
    }
    res.sort();
    Ok(res)
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use specifications::dates::parse_datetime;

    fn netcdf_ref(location: &str) -> DatasetRef {
        DatasetRef{ location: location.into(), file_hash: None, start_date: None, end_date: None }
    }

    #[test]
    fn kind_follows_extension() {
        let ds = InputDataset::from_ref(DatasetRole::ModelGrid, &netcdf_ref("/data/roms_grd.nc"));
        assert_eq!(ds.kind, DatasetKind::NetcdfFile);
        let ds = InputDataset::from_ref(DatasetRole::ModelGrid, &netcdf_ref("/data/roms_grd.yaml"));
        assert_eq!(ds.kind, DatasetKind::YamlRecipe);
        assert!(ds.needs_materialization());
    }

    #[test]
    fn coverage_checks() {
        let mut dsref = netcdf_ref("/data/roms_bry.nc");
        dsref.start_date = Some(parse_datetime("2012-01-01 00:00:00").unwrap());
        dsref.end_date = Some(parse_datetime("2012-06-30 00:00:00").unwrap());
        let ds = InputDataset::from_ref(DatasetRole::BoundaryForcing, &dsref);

        let inside = DateRange::new(
            parse_datetime("2012-02-01 00:00:00").unwrap(),
            parse_datetime("2012-03-01 00:00:00").unwrap(),
        ).unwrap();
        let outside = DateRange::new(
            parse_datetime("2012-02-01 00:00:00").unwrap(),
            parse_datetime("2012-08-01 00:00:00").unwrap(),
        ).unwrap();

        assert!(ds.covers(&inside));
        assert!(!ds.covers(&outside));
        assert!(matches!(ds.assert_covers(&outside), Err(Error::RangeNotCovered{ .. })));
    }

    #[test]
    fn unmaterialized_recipe_refuses() {
        let mut ds = InputDataset::from_ref(DatasetRole::ModelGrid, &netcdf_ref("/data/roms_grd.yaml"));
        let range = DateRange::new(
            parse_datetime("2012-01-01 00:00:00").unwrap(),
            parse_datetime("2012-02-01 00:00:00").unwrap(),
        ).unwrap();
        assert!(matches!(ds.materialize(&range), Err(Error::NotStaged{ .. })));
    }

    #[tokio::test]
    async fn stub_generator_materializes() {
        let dir = tempfile::tempdir().unwrap();

        // A stub generator that writes one .nc file next to the recipe
        let stub = dir.path().join("stub-generator.sh");
        std::fs::write(
            &stub,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--from-yaml\" ]; then recipe=\"$2\"; fi\n  shift\ndone\ntouch \"${recipe%.yaml}_out.nc\"\n",
        ).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let from = dir.path().join("roms_grd.yaml");
        std::fs::write(&from, b"grid: {}\n").unwrap();
        let mut ds = InputDataset::from_ref(DatasetRole::ModelGrid, &netcdf_ref(from.to_str().unwrap()));
        ds.get(dir.path().join("input_datasets"), false).await.unwrap();

        let range = DateRange::new(
            parse_datetime("2012-01-01 00:00:00").unwrap(),
            parse_datetime("2012-02-01 00:00:00").unwrap(),
        ).unwrap();

        std::env::set_var(ENV_CSTAR_CMD_CONVERTER_OVERRIDE, &stub);
        let res = ds.materialize(&range);
        std::env::remove_var(ENV_CSTAR_CMD_CONVERTER_OVERRIDE);

        res.unwrap();
        assert_eq!(ds.materialized.len(), 1);
        assert!(ds.materialized[0].to_string_lossy().ends_with("roms_grd_out.nc"));
    }
}
