//  BLUEPRINT.rs
//    by Lut99
//
//  Created:
//    12 Mar 2024, 13:29:55
//  Last edited:
//    09 Dec 2024, 15:44:31
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the blueprint document: the declarative YAML description of a
//!   single simulation. Two roots are accepted: the legacy
//!   `registry_attrs`/`components` layout and the modern `ROMSSimulation`
//!   layout. Both normalize to the same in-memory [`Blueprint`]; exporting
//!   always emits the modern layout.
//

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::dates::{serde_datetime_opt, DateError, DateRange};


/***** CONSTANTS *****/
/// Placeholder that blueprints may use to refer to the location their input datasets live at.
pub const INPUT_DATASETS_PLACEHOLDER: &str = "<input_datasets_location>";

/// Placeholder that blueprints may use to refer to the location their additional code lives at.
pub const ADDITIONAL_CODE_PLACEHOLDER: &str = "<additional_code_location>";





/***** ERRORS *****/
/// Defines errors that relate to reading, writing and validating blueprints.
#[derive(Debug)]
pub enum BlueprintError {
    /// Failed to read the given file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the given file as a blueprint.
    FileParseError{ path: PathBuf, err: serde_yaml::Error },
    /// Failed to parse the given string as a blueprint.
    StringParseError{ err: serde_yaml::Error },
    /// Failed to create the given file.
    FileCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to write the blueprint to the given file.
    FileWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to serialize the blueprint.
    SerializeError{ err: serde_yaml::Error },

    /// The document has neither a legacy nor a modern root.
    UnknownRoot{ found: Vec<String> },
    /// The document declares no ROMS component at all.
    MissingRomsComponent{ name: String },
    /// The document declares more than one ROMS component.
    DuplicateRomsComponent{ name: String },
    /// The ROMS component carries no discretization.
    MissingDiscretization{ name: String },
    /// A declared file hash is not 64 lowercase hexadecimal characters.
    IllegalFileHash{ location: String, raw: String },
    /// A dataset declares a start date after its end date.
    IllegalDatasetRange{ location: String, err: DateError },
    /// The blueprint-level date range is inverted.
    IllegalValidRange{ name: String, err: DateError },
}

impl Display for BlueprintError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use BlueprintError::*;
        match self {
            FileReadError{ path, err }  => write!(f, "Failed to read blueprint file '{}': {}", path.display(), err),
            FileParseError{ path, err } => write!(f, "Failed to parse blueprint file '{}': {}", path.display(), err),
            StringParseError{ err }     => write!(f, "Failed to parse given string as a blueprint: {}", err),
            FileCreateError{ path, err } => write!(f, "Failed to create blueprint file '{}': {}", path.display(), err),
            FileWriteError{ path, err }  => write!(f, "Failed to write to blueprint file '{}': {}", path.display(), err),
            SerializeError{ err }        => write!(f, "Failed to serialize blueprint: {}", err),

            UnknownRoot{ found }             => write!(f, "Blueprint has neither a 'registry_attrs' nor a 'ROMSSimulation' root (found top-level keys: {})", found.join(", ")),
            MissingRomsComponent{ name }     => write!(f, "Blueprint '{}' declares no ROMS component", name),
            DuplicateRomsComponent{ name }   => write!(f, "Blueprint '{}' declares more than one ROMS component", name),
            MissingDiscretization{ name }    => write!(f, "Blueprint '{}' declares a ROMS component without a discretization", name),
            IllegalFileHash{ location, raw } => write!(f, "Dataset '{}' declares file hash '{}', which is not 64 lowercase hexadecimal characters", location, raw),
            IllegalDatasetRange{ location, err } => write!(f, "Dataset '{}' declares an illegal date range: {}", location, err),
            IllegalValidRange{ name, err }       => write!(f, "Blueprint '{}' declares an illegal valid date range: {}", name, err),
        }
    }
}

impl Error for BlueprintError {}





/***** HELPER STRUCTS *****/
/// The legacy document root (`registry_attrs` + `components`).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyDocument {
    registry_attrs : RegistryAttrs,
    components     : Vec<Component>,
    #[serde(default)]
    runtime_vars   : BTreeMap<String, String>,
}

/// The modern document root (a single `ROMSSimulation`).
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ModernDocument {
    #[serde(rename = "ROMSSimulation")]
    roms_simulation : ModernSimulation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    runtime_vars    : BTreeMap<String, String>,
}

/// The modern simulation body. Field-for-field the ROMS component of the
/// legacy layout, plus the blueprint identity and an inlined MARBL codebase.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ModernSimulation {
    name             : String,
    valid_date_range : DateRange,
    base_model       : CodeRepositoryRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    marbl_base_model : Option<CodeRepositoryRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    discretization   : Option<Discretization>,
    #[serde(default, alias = "namelists", skip_serializing_if = "Option::is_none")]
    runtime_code     : Option<AdditionalCodeRef>,
    #[serde(default, alias = "additional_source_code", skip_serializing_if = "Option::is_none")]
    compile_time_code : Option<AdditionalCodeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_grid       : Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    initial_conditions : Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tidal_forcing    : Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    boundary_forcing : Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    surface_forcing  : Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    river_forcing    : Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forcing_corrections : Option<DatasetRef>,
}





/***** LIBRARY *****/
/// The resolution context for blueprint location placeholders.
///
/// Both placeholders default to the blueprint's own parent location, so a
/// blueprint shipped next to its datasets and code needs no configuration.
#[derive(Clone, Debug)]
pub struct PlaceholderContext {
    /// Replaces [`INPUT_DATASETS_PLACEHOLDER`].
    pub input_datasets_location  : String,
    /// Replaces [`ADDITIONAL_CODE_PLACEHOLDER`].
    pub additional_code_location : String,
}

impl PlaceholderContext {
    /// Builds a context in which both placeholders resolve to the given origin
    /// (typically the blueprint's parent directory or URL).
    #[inline]
    pub fn for_origin(origin: impl Into<String>) -> Self {
        let origin: String = origin.into();
        Self {
            input_datasets_location  : origin.clone(),
            additional_code_location : origin,
        }
    }

    /// Substitutes all placeholders in the given raw blueprint text.
    ///
    /// This is a single textual pass that runs before any YAML parsing.
    pub fn resolve(&self, raw: impl AsRef<str>) -> String {
        raw.as_ref()
            .replace(INPUT_DATASETS_PLACEHOLDER, &self.input_datasets_location)
            .replace(ADDITIONAL_CODE_PLACEHOLDER, &self.additional_code_location)
    }
}



/// The models a component can represent.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ComponentType {
    /// The UCLA-ROMS ocean model itself.
    #[serde(rename = "ROMS", alias = "roms")]
    Roms,
    /// The MARBL biogeochemistry library coupled into ROMS.
    #[serde(rename = "MARBL", alias = "marbl")]
    Marbl,
}

impl Display for ComponentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        match self {
            Self::Roms  => write!(f, "ROMS"),
            Self::Marbl => write!(f, "MARBL"),
        }
    }
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ROMS" | "roms"   => Ok(Self::Roms),
            "MARBL" | "marbl" => Ok(Self::Marbl),
            raw               => Err(format!("Unknown component type '{}'", raw)),
        }
    }
}



/// A pinned reference to a model source repository.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CodeRepositoryRef {
    /// The clone URL of the repository.
    pub source_repo     : String,
    /// The git ref (branch, tag or commit) to check out.
    pub checkout_target : String,
}

/// A reference to a set of plain-text files (namelists or compile-time
/// modifications), sourced either locally or from a repository subdirectory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdditionalCodeRef {
    /// Where the files come from: a directory path or a repository URL.
    pub location        : String,
    /// The git ref to check out when `location` is a repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_target : Option<String>,
    /// The subdirectory of the repository the files live in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir          : Option<String>,
    /// The names of the files to stage, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files           : Vec<String>,
}

/// A reference to one input dataset: either a netCDF file or a YAML recipe
/// for the external grid/forcing generator (told apart by extension).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetRef {
    /// Where the dataset comes from: a file path or an HTTP(S) URL.
    pub location   : String,
    /// The expected SHA-256 of the file, lowercase hex. Mandatory for remote
    /// datasets, advisory for local ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash  : Option<String>,
    /// Start of the period this dataset covers.
    #[serde(default, with = "serde_datetime_opt", skip_serializing_if = "Option::is_none")]
    pub start_date : Option<NaiveDateTime>,
    /// End of the period this dataset covers.
    #[serde(default, with = "serde_datetime_opt", skip_serializing_if = "Option::is_none")]
    pub end_date   : Option<NaiveDateTime>,
}

impl DatasetRef {
    /// Returns whether the location looks like a remote URL rather than a filesystem path.
    #[inline]
    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    /// Returns whether the location names a YAML recipe instead of a ready netCDF file.
    #[inline]
    pub fn is_recipe(&self) -> bool {
        self.location.ends_with(".yaml") || self.location.ends_with(".yml")
    }

    /// Returns the date range this dataset covers, if it declares one fully.
    pub fn date_range(&self) -> Option<DateRange> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => DateRange::new(start, end).ok(),
            _                        => None,
        }
    }
}



/// The roles an input dataset can play in a simulation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRole {
    ModelGrid,
    InitialConditions,
    TidalForcing,
    BoundaryForcing,
    SurfaceForcing,
    RiverForcing,
    ForcingCorrections,
}

impl DatasetRole {
    /// Returns whether a simulation cannot run without a dataset in this role.
    #[inline]
    pub fn is_required(&self) -> bool {
        matches!(self, Self::ModelGrid | Self::InitialConditions)
    }
}

impl Display for DatasetRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DatasetRole::*;
        match self {
            ModelGrid          => write!(f, "model_grid"),
            InitialConditions  => write!(f, "initial_conditions"),
            TidalForcing       => write!(f, "tidal_forcing"),
            BoundaryForcing    => write!(f, "boundary_forcing"),
            SurfaceForcing     => write!(f, "surface_forcing"),
            RiverForcing       => write!(f, "river_forcing"),
            ForcingCorrections => write!(f, "forcing_corrections"),
        }
    }
}



/// The rank grid and time step of a simulation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Discretization {
    /// Number of ranks the domain is split into along the x-axis.
    pub n_procs_x : u32,
    /// Number of ranks the domain is split into along the y-axis.
    pub n_procs_y : u32,
    /// The time step, in seconds, the model integrates over.
    pub time_step : u32,
}

impl Discretization {
    /// The total number of MPI ranks this discretization requires.
    #[inline]
    pub fn n_ranks(&self) -> u32 { self.n_procs_x * self.n_procs_y }
}

impl Display for Discretization {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}x{} ranks @ {}s", self.n_procs_x, self.n_procs_y, self.time_step)
    }
}



/// The blueprint identity block of the legacy layout.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryAttrs {
    /// The user-friendly name of the blueprint.
    pub name             : String,
    /// The period the blueprint's datasets and code are valid for.
    pub valid_date_range : DateRange,
}

/// One model component of a blueprint.
///
/// The legacy layout lists these explicitly; the modern layout folds the
/// MARBL component into the ROMS body, from which it is reconstructed here.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Component {
    /// Which model this component represents.
    pub component_type : ComponentType,
    /// The pinned source repository of the model.
    pub base_model     : CodeRepositoryRef,

    /// The rank grid and time step (ROMS components only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discretization : Option<Discretization>,
    /// Runtime namelists. The legacy layout spells this `namelists`.
    #[serde(default, alias = "namelists", skip_serializing_if = "Option::is_none")]
    pub runtime_code   : Option<AdditionalCodeRef>,
    /// Compile-time source modifications. The legacy layout spells this `additional_source_code`.
    #[serde(default, alias = "additional_source_code", skip_serializing_if = "Option::is_none")]
    pub compile_time_code : Option<AdditionalCodeRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_grid         : Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_conditions : Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tidal_forcing      : Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundary_forcing   : Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub surface_forcing    : Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub river_forcing      : Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forcing_corrections : Option<DatasetRef>,
}

impl Component {
    /// Returns all datasets this component references, tagged with their role.
    pub fn datasets(&self) -> Vec<(DatasetRole, &DatasetRef)> {
        let mut res: Vec<(DatasetRole, &DatasetRef)> = Vec::with_capacity(8);
        if let Some(ds) = &self.model_grid { res.push((DatasetRole::ModelGrid, ds)); }
        if let Some(ds) = &self.initial_conditions { res.push((DatasetRole::InitialConditions, ds)); }
        if let Some(ds) = &self.tidal_forcing { res.push((DatasetRole::TidalForcing, ds)); }
        for ds in &self.boundary_forcing { res.push((DatasetRole::BoundaryForcing, ds)); }
        for ds in &self.surface_forcing { res.push((DatasetRole::SurfaceForcing, ds)); }
        for ds in &self.river_forcing { res.push((DatasetRole::RiverForcing, ds)); }
        if let Some(ds) = &self.forcing_corrections { res.push((DatasetRole::ForcingCorrections, ds)); }
        res
    }
}



/// The normalized, in-memory form of a blueprint document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Blueprint {
    /// The user-friendly name of the blueprint.
    pub name             : String,
    /// The period the blueprint's datasets and code are valid for.
    pub valid_date_range : DateRange,
    /// The model components, MARBL (if any) first.
    pub components       : Vec<Component>,
    /// Free-form runtime substitution variables.
    pub runtime_vars     : BTreeMap<String, String>,
}

impl Blueprint {
    /// Reads the blueprint at the given path.
    ///
    /// Location placeholders are resolved against the file's parent directory
    /// before parsing.
    ///
    /// # Errors
    /// This function errors if the file could not be read, parsed or validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BlueprintError> {
        let path: &Path = path.as_ref();

        let raw: String = match fs::read_to_string(path) {
            Ok(raw)  => raw,
            Err(err) => { return Err(BlueprintError::FileReadError{ path: path.into(), err }); },
        };

        // Resolve placeholders against the blueprint's own directory
        let origin: String = path.parent().unwrap_or_else(|| Path::new(".")).to_string_lossy().into();
        let ctx: PlaceholderContext = PlaceholderContext::for_origin(origin);

        match Self::from_yaml(ctx.resolve(raw)) {
            Ok(res)                                       => Ok(res),
            Err(BlueprintError::StringParseError{ err })  => Err(BlueprintError::FileParseError{ path: path.into(), err }),
            Err(err)                                      => Err(err),
        }
    }

    /// Parses the given string as a blueprint document.
    ///
    /// The caller is responsible for resolving placeholders first (see
    /// [`PlaceholderContext`]); any that remain are passed through verbatim.
    ///
    /// # Errors
    /// This function errors if the string is not valid YAML, has an unknown
    /// root or fails structural validation.
    pub fn from_yaml(raw: impl AsRef<str>) -> Result<Self, BlueprintError> {
        let raw: &str = raw.as_ref();

        // Peek at the top-level keys to decide which layout we are reading
        let value: serde_yaml::Value = match serde_yaml::from_str(raw) {
            Ok(value) => value,
            Err(err)  => { return Err(BlueprintError::StringParseError{ err }); },
        };
        let keys: Vec<String> = value
            .as_mapping()
            .map(|m| m.keys().filter_map(|k| k.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let res: Self = if keys.iter().any(|k| k == "registry_attrs") {
            let doc: LegacyDocument = match serde_yaml::from_str(raw) {
                Ok(doc)  => doc,
                Err(err) => { return Err(BlueprintError::StringParseError{ err }); },
            };
            Self {
                name             : doc.registry_attrs.name,
                valid_date_range : doc.registry_attrs.valid_date_range,
                components       : doc.components,
                runtime_vars     : doc.runtime_vars,
            }
        } else if keys.iter().any(|k| k == "ROMSSimulation") {
            let doc: ModernDocument = match serde_yaml::from_str(raw) {
                Ok(doc)  => doc,
                Err(err) => { return Err(BlueprintError::StringParseError{ err }); },
            };
            Self::from_modern(doc)
        } else {
            return Err(BlueprintError::UnknownRoot{ found: keys });
        };

        res.validate()?;
        Ok(res)
    }

    /// Reconstructs the component list from the modern single-root layout.
    fn from_modern(doc: ModernDocument) -> Self {
        let sim: ModernSimulation = doc.roms_simulation;

        let mut components: Vec<Component> = Vec::with_capacity(2);
        if let Some(marbl) = sim.marbl_base_model {
            components.push(Component {
                component_type      : ComponentType::Marbl,
                base_model          : marbl,
                discretization      : None,
                runtime_code        : None,
                compile_time_code   : None,
                model_grid          : None,
                initial_conditions  : None,
                tidal_forcing       : None,
                boundary_forcing    : vec![],
                surface_forcing     : vec![],
                river_forcing       : vec![],
                forcing_corrections : None,
            });
        }
        components.push(Component {
            component_type      : ComponentType::Roms,
            base_model          : sim.base_model,
            discretization      : sim.discretization,
            runtime_code        : sim.runtime_code,
            compile_time_code   : sim.compile_time_code,
            model_grid          : sim.model_grid,
            initial_conditions  : sim.initial_conditions,
            tidal_forcing       : sim.tidal_forcing,
            boundary_forcing    : sim.boundary_forcing,
            surface_forcing     : sim.surface_forcing,
            river_forcing       : sim.river_forcing,
            forcing_corrections : sim.forcing_corrections,
        });

        Self {
            name             : sim.name,
            valid_date_range : sim.valid_date_range,
            components,
            runtime_vars     : doc.runtime_vars,
        }
    }

    /// Serializes the blueprint in the modern layout.
    ///
    /// # Errors
    /// This function errors if serialization fails, or if the blueprint has no
    /// (single) ROMS component to hang the document on.
    pub fn to_yaml(&self) -> Result<String, BlueprintError> {
        let roms: &Component = match self.roms_component() {
            Some(roms) => roms,
            None       => { return Err(BlueprintError::MissingRomsComponent{ name: self.name.clone() }); },
        };
        let marbl: Option<&Component> = self.marbl_component();

        let doc: ModernDocument = ModernDocument {
            roms_simulation : ModernSimulation {
                name                : self.name.clone(),
                valid_date_range    : self.valid_date_range,
                base_model          : roms.base_model.clone(),
                marbl_base_model    : marbl.map(|c| c.base_model.clone()),
                discretization      : roms.discretization,
                runtime_code        : roms.runtime_code.clone(),
                compile_time_code   : roms.compile_time_code.clone(),
                model_grid          : roms.model_grid.clone(),
                initial_conditions  : roms.initial_conditions.clone(),
                tidal_forcing       : roms.tidal_forcing.clone(),
                boundary_forcing    : roms.boundary_forcing.clone(),
                surface_forcing     : roms.surface_forcing.clone(),
                river_forcing       : roms.river_forcing.clone(),
                forcing_corrections : roms.forcing_corrections.clone(),
            },
            runtime_vars : self.runtime_vars.clone(),
        };

        match serde_yaml::to_string(&doc) {
            Ok(raw)  => Ok(raw),
            Err(err) => Err(BlueprintError::SerializeError{ err }),
        }
    }

    /// Writes the blueprint, in the modern layout, to the given path.
    ///
    /// # Errors
    /// This function errors if serialization or the write fails.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), BlueprintError> {
        let path: &Path = path.as_ref();
        let raw: String = self.to_yaml()?;
        match fs::write(path, raw) {
            Ok(_)    => Ok(()),
            Err(err) => Err(BlueprintError::FileWriteError{ path: path.into(), err }),
        }
    }



    /// Runs the structural checks that do not need any I/O.
    ///
    /// # Errors
    /// This function errors on the first violated rule: exactly one ROMS
    /// component, a discretization on it, well-formed file hashes and
    /// non-inverted date ranges.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        // The overall validity window must not be inverted
        if let Err(err) = DateRange::new(self.valid_date_range.start_date, self.valid_date_range.end_date) {
            return Err(BlueprintError::IllegalValidRange{ name: self.name.clone(), err });
        }

        // Exactly one ROMS component
        let n_roms: usize = self.components.iter().filter(|c| c.component_type == ComponentType::Roms).count();
        if n_roms == 0 { return Err(BlueprintError::MissingRomsComponent{ name: self.name.clone() }); }
        if n_roms > 1 { return Err(BlueprintError::DuplicateRomsComponent{ name: self.name.clone() }); }

        // The ROMS component needs a rank layout to ever run
        let roms: &Component = self.roms_component().unwrap();
        if roms.discretization.is_none() {
            return Err(BlueprintError::MissingDiscretization{ name: self.name.clone() });
        }

        // Hashes are 64 lowercase hex characters; dataset ranges are not inverted
        for component in &self.components {
            for (_, ds) in component.datasets() {
                if let Some(hash) = &ds.file_hash {
                    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
                        return Err(BlueprintError::IllegalFileHash{ location: ds.location.clone(), raw: hash.clone() });
                    }
                }
                if let (Some(start), Some(end)) = (ds.start_date, ds.end_date) {
                    if let Err(err) = DateRange::new(start, end) {
                        return Err(BlueprintError::IllegalDatasetRange{ location: ds.location.clone(), err });
                    }
                }
            }
        }

        Ok(())
    }



    /// Returns the single ROMS component, if any.
    #[inline]
    pub fn roms_component(&self) -> Option<&Component> {
        self.components.iter().find(|c| c.component_type == ComponentType::Roms)
    }

    /// Returns the MARBL component, if any.
    #[inline]
    pub fn marbl_component(&self) -> Option<&Component> {
        self.components.iter().find(|c| c.component_type == ComponentType::Marbl)
    }

    /// Returns the rank grid and time step of the ROMS component.
    #[inline]
    pub fn discretization(&self) -> Option<Discretization> {
        self.roms_component().and_then(|c| c.discretization)
    }

    /// Returns the total number of MPI ranks this blueprint needs to run.
    #[inline]
    pub fn cpus_needed(&self) -> u32 {
        self.discretization().map(|d| d.n_ranks()).unwrap_or(1)
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_datetime;

    /// A legacy-layout blueprint with YAML-recipe datasets, shaped after the
    /// ROMS-MARBL test case: a MARBL component and a ROMS component carrying
    /// six datasets.
    const LEGACY_TEMPLATE: &str = r#"
registry_attrs:
  name: roms_marbl_example
  valid_date_range:
    start_date: "2012-01-01 12:00:00"
    end_date: "2012-12-31 12:00:00"
components:
  - component_type: MARBL
    base_model:
      source_repo: https://github.com/marbl-ecosys/MARBL.git
      checkout_target: marbl0.45.0
  - component_type: ROMS
    base_model:
      source_repo: https://github.com/CESR-lab/ucla-roms.git
      checkout_target: main
    discretization:
      n_procs_x: 2
      n_procs_y: 3
      time_step: 60
    namelists:
      location: <additional_code_location>
      subdir: namelists
      files:
        - roms.in_TEMPLATE
        - marbl_in
    additional_source_code:
      location: <additional_code_location>
      subdir: additional_source_code
      files:
        - bgc.opt
        - cppdefs.opt
    model_grid:
      location: <input_datasets_location>/roms_grd.yaml
    initial_conditions:
      location: <input_datasets_location>/roms_ini.yaml
    tidal_forcing:
      location: <input_datasets_location>/roms_tides.yaml
    boundary_forcing:
      - location: <input_datasets_location>/roms_bry.yaml
    surface_forcing:
      - location: <input_datasets_location>/roms_frc.yaml
      - location: <input_datasets_location>/roms_frc_bgc.yaml
"#;

    #[test]
    fn legacy_template_parses_and_normalizes() {
        let ctx = PlaceholderContext {
            input_datasets_location  : "/data/blueprints/example".into(),
            additional_code_location : "https://github.com/CWorthy-ocean/cstar_blueprint_test_case.git".into(),
        };
        let bp = Blueprint::from_yaml(ctx.resolve(LEGACY_TEMPLATE)).unwrap();

        assert_eq!(bp.name, "roms_marbl_example");
        assert_eq!(bp.components[0].component_type, ComponentType::Marbl);
        assert_eq!(bp.components[1].component_type, ComponentType::Roms);
        assert_eq!(bp.components[1].discretization.unwrap().n_procs_x, 2);
        assert_eq!(bp.components[1].datasets().len(), 6);

        // The `namelists` alias lands in `runtime_code`
        let runtime_code = bp.components[1].runtime_code.as_ref().unwrap();
        assert_eq!(runtime_code.files, vec!["roms.in_TEMPLATE".to_string(), "marbl_in".to_string()]);
        assert_eq!(runtime_code.location, "https://github.com/CWorthy-ocean/cstar_blueprint_test_case.git");

        // All placeholders are gone after the pre-parse pass
        let grid = bp.components[1].model_grid.as_ref().unwrap();
        assert_eq!(grid.location, "/data/blueprints/example/roms_grd.yaml");
        assert!(grid.is_recipe());
    }

    #[test]
    fn roundtrip_is_stable() {
        let ctx = PlaceholderContext::for_origin("/data/blueprints/example");
        let bp = Blueprint::from_yaml(ctx.resolve(LEGACY_TEMPLATE)).unwrap();

        // parse(render(parse(b))) == parse(b)
        let rendered: String = bp.to_yaml().unwrap();
        let back = Blueprint::from_yaml(&rendered).unwrap();
        assert_eq!(back, bp);

        // ...and rendering the reparse is byte-stable too
        assert_eq!(back.to_yaml().unwrap(), rendered);
    }

    #[test]
    fn modern_layout_parses() {
        let raw: &str = r#"
ROMSSimulation:
  name: little_run
  valid_date_range:
    start_date: "2020-01-01 00:00:00"
    end_date: "2020-06-30 00:00:00"
  base_model:
    source_repo: https://github.com/CESR-lab/ucla-roms.git
    checkout_target: main
  discretization:
    n_procs_x: 4
    n_procs_y: 2
    time_step: 30
  runtime_code:
    location: /code/runtime
    files: [roms.in_TEMPLATE]
  model_grid:
    location: /data/grid.nc
    file_hash: ee2ba557bd45645a8ddd5da464a88b382a078265d15106ca4b4cf7e55f182a44
  initial_conditions:
    location: /data/ini.nc
"#;
        let bp = Blueprint::from_yaml(raw).unwrap();
        assert_eq!(bp.components.len(), 1);
        assert_eq!(bp.cpus_needed(), 8);
        assert!(!bp.components[0].model_grid.as_ref().unwrap().is_recipe());
    }

    #[test]
    fn unknown_root_is_rejected() {
        assert!(matches!(
            Blueprint::from_yaml("some_key: 5\n"),
            Err(BlueprintError::UnknownRoot{ .. })
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw: String = LEGACY_TEMPLATE.replace("registry_attrs:", "not_a_real_field: true\nregistry_attrs:");
        let ctx = PlaceholderContext::for_origin("/tmp");
        assert!(matches!(
            Blueprint::from_yaml(ctx.resolve(raw)),
            Err(BlueprintError::StringParseError{ .. })
        ));
    }

    #[test]
    fn bad_hash_is_rejected() {
        let raw: &str = r#"
ROMSSimulation:
  name: bad_hash
  valid_date_range:
    start_date: "2020-01-01 00:00:00"
    end_date: "2020-06-30 00:00:00"
  base_model:
    source_repo: https://github.com/CESR-lab/ucla-roms.git
    checkout_target: main
  discretization:
    n_procs_x: 1
    n_procs_y: 1
    time_step: 30
  model_grid:
    location: /data/grid.nc
    file_hash: DEADBEEF
"#;
        assert!(matches!(
            Blueprint::from_yaml(raw),
            Err(BlueprintError::IllegalFileHash{ .. })
        ));
    }

    #[test]
    fn valid_range_is_parsed() {
        let ctx = PlaceholderContext::for_origin("/tmp");
        let bp = Blueprint::from_yaml(ctx.resolve(LEGACY_TEMPLATE)).unwrap();
        assert_eq!(bp.valid_date_range.start_date, parse_datetime("2012-01-01 12:00:00").unwrap());
        assert!(!bp.valid_date_range.contains(&parse_datetime("2011-12-31 12:00:00").unwrap()));
    }
}
