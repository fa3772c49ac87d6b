//  WORKPLAN.rs
//    by Lut99
//
//  Created:
//    14 Mar 2024, 11:10:09
//  Last edited:
//    05 Dec 2024, 09:26:40
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the workplan document: a named DAG of blueprint-executing
//!   steps, plus the structural validation that makes it a DAG in the
//!   first place.
//

use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Defines errors that relate to reading, writing and validating workplans.
#[derive(Debug)]
pub enum WorkplanError {
    /// Failed to read the given file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the given file as a workplan.
    FileParseError{ path: PathBuf, err: serde_yaml::Error },
    /// Failed to parse the given string as a workplan.
    StringParseError{ err: serde_yaml::Error },
    /// Failed to serialize the workplan.
    SerializeError{ err: serde_yaml::Error },
    /// Failed to write the workplan to the given file.
    FileWriteError{ path: PathBuf, err: std::io::Error },

    /// The workplan declares no steps.
    NoSteps{ name: String },
    /// Two or more steps share a name.
    DuplicateStepName{ name: String, step: String },
    /// A step depends on a name that is not a sibling step.
    UnknownDependency{ name: String, step: String, dependency: String },
    /// A step depends on itself.
    SelfDependency{ name: String, step: String },
}

impl Display for WorkplanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use WorkplanError::*;
        match self {
            FileReadError{ path, err }  => write!(f, "Failed to read workplan file '{}': {}", path.display(), err),
            FileParseError{ path, err } => write!(f, "Failed to parse workplan file '{}': {}", path.display(), err),
            StringParseError{ err }     => write!(f, "Failed to parse given string as a workplan: {}", err),
            SerializeError{ err }       => write!(f, "Failed to serialize workplan: {}", err),
            FileWriteError{ path, err } => write!(f, "Failed to write to workplan file '{}': {}", path.display(), err),

            NoSteps{ name }                            => write!(f, "Workplan '{}' declares no steps", name),
            DuplicateStepName{ name, step }            => write!(f, "Workplan '{}' declares more than one step named '{}'", name, step),
            UnknownDependency{ name, step, dependency } => write!(f, "Step '{}' in workplan '{}' depends on '{}', which is not a sibling step", step, name, dependency),
            SelfDependency{ name, step }               => write!(f, "Step '{}' in workplan '{}' depends on itself", step, name),
        }
    }
}

impl Error for WorkplanError {}





/***** LIBRARY *****/
/// The validation states a workplan can be in.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkplanState {
    /// The workplan has not been validated.
    #[default]
    Draft,
    /// The workplan has been validated.
    Validated,
}

impl Display for WorkplanState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        match self {
            Self::Draft     => write!(f, "draft"),
            Self::Validated => write!(f, "validated"),
        }
    }
}



/// A value in one of the override maps: a string, a number, or a list of either.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Str(String),
    Num(f64),
    StrList(Vec<String>),
    NumList(Vec<f64>),
}

/// A collection of user-defined key/value overrides.
pub type OverrideMap = BTreeMap<String, OverrideValue>;



/// An individual unit of execution within a workplan.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// The user-friendly name of the step. Unique within the workplan.
    pub name        : String,
    /// The name of the application executed in the step (e.g. `roms_marbl`).
    pub application : String,
    /// The path or URL of the blueprint this step executes.
    pub blueprint   : String,

    /// Names of sibling steps that must complete before this one may start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on  : Vec<String>,

    /// Overrides applied to the blueprint before it is materialized.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blueprint_overrides : OverrideMap,
    /// Overrides applied to the compute environment for this step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compute_overrides   : OverrideMap,
    /// Overrides applied to workflow-level behavior for this step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workflow_overrides  : OverrideMap,
}



/// A collection of executable steps and the configuration to run them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Workplan {
    /// The user-friendly name of the workplan.
    pub name        : String,
    /// A user-friendly description of the workplan.
    pub description : String,
    /// The current validation status.
    #[serde(default)]
    pub state       : WorkplanState,

    /// The steps to be executed, in declaration order.
    pub steps       : Vec<Step>,

    /// Attributes of the target compute environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compute_environment : OverrideMap,
    /// User-defined variables substituted at runtime.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_vars        : BTreeMap<String, String>,
}

impl Workplan {
    /// Reads the workplan at the given path.
    ///
    /// # Errors
    /// This function errors if the file could not be read, parsed or validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WorkplanError> {
        let path: &Path = path.as_ref();

        let raw: String = match fs::read_to_string(path) {
            Ok(raw)  => raw,
            Err(err) => { return Err(WorkplanError::FileReadError{ path: path.into(), err }); },
        };
        match Self::from_yaml(&raw) {
            Ok(res)                                     => Ok(res),
            Err(WorkplanError::StringParseError{ err }) => Err(WorkplanError::FileParseError{ path: path.into(), err }),
            Err(err)                                    => Err(err),
        }
    }

    /// Parses the given string as a workplan document.
    ///
    /// # Errors
    /// This function errors if the string is not valid YAML or fails
    /// structural validation. Acyclicity is _not_ checked here; that is the
    /// planner's job, since it needs the graph anyway.
    pub fn from_yaml(raw: impl AsRef<str>) -> Result<Self, WorkplanError> {
        let res: Self = match serde_yaml::from_str(raw.as_ref()) {
            Ok(res)  => res,
            Err(err) => { return Err(WorkplanError::StringParseError{ err }); },
        };
        res.validate()?;
        Ok(res)
    }

    /// Serializes the workplan to YAML.
    ///
    /// # Errors
    /// This function errors if serialization fails.
    pub fn to_yaml(&self) -> Result<String, WorkplanError> {
        match serde_yaml::to_string(self) {
            Ok(raw)  => Ok(raw),
            Err(err) => Err(WorkplanError::SerializeError{ err }),
        }
    }

    /// Writes the workplan to the given path.
    ///
    /// # Errors
    /// This function errors if serialization or the write fails.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), WorkplanError> {
        let path: &Path = path.as_ref();
        let raw: String = self.to_yaml()?;
        match fs::write(path, raw) {
            Ok(_)    => Ok(()),
            Err(err) => Err(WorkplanError::FileWriteError{ path: path.into(), err }),
        }
    }



    /// Runs the structural checks: at least one step, unique step names, and
    /// every dependency resolving to a sibling (and never to the step itself).
    ///
    /// # Errors
    /// This function errors on the first violated rule.
    pub fn validate(&self) -> Result<(), WorkplanError> {
        if self.steps.is_empty() { return Err(WorkplanError::NoSteps{ name: self.name.clone() }); }

        let mut seen: HashSet<&str> = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(&step.name) {
                return Err(WorkplanError::DuplicateStepName{ name: self.name.clone(), step: step.name.clone() });
            }
        }

        let names: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(WorkplanError::SelfDependency{ name: self.name.clone(), step: step.name.clone() });
                }
                if !names.contains(dep.as_str()) {
                    return Err(WorkplanError::UnknownDependency{ name: self.name.clone(), step: step.name.clone(), dependency: dep.clone() });
                }
            }
        }

        Ok(())
    }

    /// Returns the step with the given name, if any.
    #[inline]
    pub fn step(&self, name: impl AsRef<str>) -> Option<&Step> {
        let name: &str = name.as_ref();
        self.steps.iter().find(|s| s.name == name)
    }

    /// Renders the workplan as canonical YAML: mapping keys sorted, comments
    /// (which YAML parsing strips anyway) gone. The orchestrator hashes this
    /// to detect run-ID reuse against a different plan.
    ///
    /// # Errors
    /// This function errors if (re)serialization fails.
    pub fn canonical_yaml(&self) -> Result<String, WorkplanError> {
        let value: serde_yaml::Value = match serde_yaml::to_value(self) {
            Ok(value) => value,
            Err(err)  => { return Err(WorkplanError::SerializeError{ err }); },
        };
        match serde_yaml::to_string(&canonicalize(value)) {
            Ok(raw)  => Ok(raw),
            Err(err) => Err(WorkplanError::SerializeError{ err }),
        }
    }
}



/// Recursively sorts all mapping keys in the given YAML value.
fn canonicalize(value: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match value {
        Value::Mapping(map) => {
            let mut entries: Vec<(Value, Value)> = map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            entries.sort_by_key(|(k, _)| serde_yaml::to_string(k).unwrap_or_default());
            Value::Mapping(entries.into_iter().collect())
        },
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(canonicalize).collect()),
        other => other,
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
name: three_jobs
description: Two independent jobs and one that waits for the first.
state: draft
steps:
  - name: job1
    application: roms_marbl
    blueprint: ./blueprints/job1.yaml
  - name: job2
    application: roms_marbl
    blueprint: ./blueprints/job2.yaml
    depends_on: [job1]
  - name: job3
    application: roms_marbl
    blueprint: ./blueprints/job3.yaml
runtime_vars:
  account: m1234
"#;

    #[test]
    fn example_parses() {
        let wp = Workplan::from_yaml(EXAMPLE).unwrap();
        assert_eq!(wp.name, "three_jobs");
        assert_eq!(wp.state, WorkplanState::Draft);
        assert_eq!(wp.steps.len(), 3);
        assert_eq!(wp.steps[1].depends_on, vec!["job1".to_string()]);
        assert_eq!(wp.runtime_vars.get("account").map(String::as_str), Some("m1234"));
    }

    #[test]
    fn roundtrip_is_stable() {
        let wp = Workplan::from_yaml(EXAMPLE).unwrap();
        let back = Workplan::from_yaml(wp.to_yaml().unwrap()).unwrap();
        assert_eq!(back, wp);
    }

    #[test]
    fn duplicate_names_rejected() {
        let raw: String = EXAMPLE.replace("name: job3", "name: job1");
        assert!(matches!(Workplan::from_yaml(raw), Err(WorkplanError::DuplicateStepName{ .. })));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let raw: String = EXAMPLE.replace("depends_on: [job1]", "depends_on: [job9]");
        assert!(matches!(Workplan::from_yaml(raw), Err(WorkplanError::UnknownDependency{ .. })));
    }

    #[test]
    fn self_dependency_rejected() {
        let raw: String = EXAMPLE.replace("depends_on: [job1]", "depends_on: [job2]");
        assert!(matches!(Workplan::from_yaml(raw), Err(WorkplanError::SelfDependency{ .. })));
    }

    #[test]
    fn empty_steps_rejected() {
        let raw: &str = "name: hollow\ndescription: no steps at all\nsteps: []\n";
        assert!(matches!(Workplan::from_yaml(raw), Err(WorkplanError::NoSteps{ .. })));
    }

    #[test]
    fn canonical_yaml_ignores_declaration_noise() {
        let wp = Workplan::from_yaml(EXAMPLE).unwrap();
        // Same plan, different formatting and key order in the source text
        let shuffled: &str = r#"
description: Two independent jobs and one that waits for the first.
name: three_jobs
state: draft
runtime_vars: { account: m1234 }
steps:
  - application: roms_marbl
    name: job1
    blueprint: ./blueprints/job1.yaml
  - blueprint: ./blueprints/job2.yaml
    name: job2
    application: roms_marbl
    depends_on: [job1]
  - name: job3
    blueprint: ./blueprints/job3.yaml
    application: roms_marbl
"#;
        let wp2 = Workplan::from_yaml(shuffled).unwrap();
        assert_eq!(wp.canonical_yaml().unwrap(), wp2.canonical_yaml().unwrap());
    }
}
