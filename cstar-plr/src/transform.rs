//  TRANSFORM.rs
//    by Lut99
//
//  Created:
//    18 Apr 2024, 14:20:11
//  Last edited:
//    12 Dec 2024, 11:21:47
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the optional time-splitting transform: one long simulation
//!   step becomes a linear chain of shorter, restart-coupled steps. Each
//!   link starts where the previous one ended and takes its initial
//!   conditions from the previous link's restart output.
//

use std::env;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::info;

use cstar_cfg::spec::ENV_CSTAR_ORCH_TRX_FREQ;
use cstar_sim::simulation::OUTPUT_DIR;
use specifications::blueprint::{Blueprint, DatasetRef};
use specifications::dates::DateRange;
use specifications::workplan::{Step, Workplan};

pub use crate::errors::TransformError as Error;


/***** LIBRARY *****/
/// The granularities a long simulation can be split at.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SplitFrequency {
    Monthly,
    Weekly,
    Daily,
}

impl SplitFrequency {
    /// Reads the configured frequency from `$CSTAR_ORCH_TRX_FREQ`.
    ///
    /// # Returns
    /// `None` when the variable is unset (the transform is off).
    ///
    /// # Errors
    /// This function errors if the variable is set to something unknown.
    pub fn from_env() -> Result<Option<Self>, Error> {
        match env::var(ENV_CSTAR_ORCH_TRX_FREQ) {
            Ok(raw)  => Self::from_str(&raw).map(Some),
            Err(_)   => Ok(None),
        }
    }
}

impl Display for SplitFrequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Weekly  => write!(f, "weekly"),
            Self::Daily   => write!(f, "daily"),
        }
    }
}

impl FromStr for SplitFrequency {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "monthly" => Ok(Self::Monthly),
            "weekly"  => Ok(Self::Weekly),
            "daily"   => Ok(Self::Daily),
            raw       => Err(Error::UnknownFrequency{ raw: raw.into() }),
        }
    }
}



/// Splits the given range into contiguous sub-ranges at the given
/// granularity. Monthly splits align to calendar month starts; weekly and
/// daily splits count from the range start.
pub fn split_range(range: &DateRange, freq: SplitFrequency) -> Vec<DateRange> {
    let mut res: Vec<DateRange> = Vec::new();

    let mut cursor: NaiveDateTime = range.start_date;
    while cursor < range.end_date {
        let boundary: NaiveDateTime = match freq {
            SplitFrequency::Monthly => {
                let (year, month): (i32, u32) = if cursor.month() == 12 { (cursor.year() + 1, 1) } else { (cursor.year(), cursor.month() + 1) };
                // The 1st always exists
                NaiveDateTime::new(NaiveDate::from_ymd_opt(year, month, 1).unwrap(), NaiveTime::MIN)
            },
            SplitFrequency::Weekly => cursor + Duration::days(7),
            SplitFrequency::Daily  => cursor + Duration::days(1),
        };
        let end: NaiveDateTime = boundary.min(range.end_date);
        // Non-empty by loop condition
        res.push(DateRange::new(cursor, end).unwrap());
        cursor = end;
    }

    res
}



/// Rewrites the named step of the given workplan into a chain of
/// restart-coupled steps, one per sub-range of the blueprint's validity
/// window.
///
/// Derived blueprints (narrowed validity window; initial conditions wired
/// to the previous link's restart file) are written into `blueprints_dir`.
/// Steps that depended on the original step are re-pointed at the last
/// link. A window that yields a single sub-range leaves the workplan
/// untouched.
///
/// # Arguments
/// - `workplan`: The plan to transform.
/// - `step_name`: The step to split.
/// - `blueprint`: The step's (already loaded and resolved) blueprint.
/// - `freq`: The split granularity.
/// - `blueprints_dir`: Where the derived blueprint files go.
/// - `outputs_dir`: The orchestrator's step-output directory, used to
///   predict each link's restart file location.
///
/// # Errors
/// This function errors if the step does not exist or a derived blueprint
/// cannot be written.
pub fn split_step(
    workplan: &Workplan,
    step_name: &str,
    blueprint: &Blueprint,
    freq: SplitFrequency,
    blueprints_dir: impl AsRef<Path>,
    outputs_dir: impl AsRef<Path>,
) -> Result<Workplan, Error> {
    let blueprints_dir: &Path = blueprints_dir.as_ref();
    let outputs_dir: &Path = outputs_dir.as_ref();

    let position: usize = match workplan.steps.iter().position(|s| s.name == step_name) {
        Some(position) => position,
        None           => { return Err(Error::UnknownStep{ workplan: workplan.name.clone(), step: step_name.into() }); },
    };
    let step: &Step = &workplan.steps[position];

    let segments: Vec<DateRange> = split_range(&blueprint.valid_date_range, freq);
    if segments.len() < 2 {
        return Ok(workplan.clone());
    }
    info!("Splitting step '{}' {} into {} sub-steps", step_name, freq, segments.len());

    if !blueprints_dir.exists() {
        if let Err(err) = std::fs::create_dir_all(blueprints_dir) {
            return Err(Error::DirCreateError{ path: blueprints_dir.into(), err });
        }
    }

    // Derive one blueprint and one step per segment
    let mut chain: Vec<Step> = Vec::with_capacity(segments.len());
    let mut prev_step_name: Option<String> = None;
    for (i, segment) in segments.iter().enumerate() {
        let link_name: String = format!("{}-{:02}", step.name, i + 1);

        let mut derived: Blueprint = blueprint.clone();
        derived.valid_date_range = *segment;
        if let Some(prev) = &prev_step_name {
            // This link starts from the previous link's restart output
            let restart: PathBuf = outputs_dir.join(prev).join(OUTPUT_DIR).join(format!("{}_rst.nc", blueprint.name));
            let roms_index: usize = derived.components.iter().position(|c| c.component_type == specifications::blueprint::ComponentType::Roms).unwrap();
            derived.components[roms_index].initial_conditions = Some(DatasetRef {
                location   : restart.display().to_string(),
                file_hash  : None,
                start_date : None,
                end_date   : None,
            });
        }

        let bp_path: PathBuf = blueprints_dir.join(format!("{}.yaml", link_name));
        if let Err(err) = derived.to_path(&bp_path) {
            return Err(Error::WriteError{ path: bp_path, err });
        }

        chain.push(Step {
            name                : link_name.clone(),
            application         : step.application.clone(),
            blueprint           : bp_path.display().to_string(),
            depends_on          : match &prev_step_name {
                Some(prev) => vec![prev.clone()],
                None       => step.depends_on.clone(),
            },
            blueprint_overrides : step.blueprint_overrides.clone(),
            compute_overrides   : step.compute_overrides.clone(),
            workflow_overrides  : step.workflow_overrides.clone(),
        });
        prev_step_name = Some(link_name);
    }
    let last_link: String = prev_step_name.unwrap();

    // Splice the chain in and re-point old dependents at the last link
    let mut steps: Vec<Step> = Vec::with_capacity(workplan.steps.len() - 1 + chain.len());
    for (i, step) in workplan.steps.iter().enumerate() {
        if i == position {
            steps.extend(chain.drain(..));
            continue;
        }
        let mut step: Step = step.clone();
        for dep in step.depends_on.iter_mut() {
            if dep == step_name { *dep = last_link.clone(); }
        }
        steps.push(step);
    }

    let mut res: Workplan = workplan.clone();
    res.steps = steps;
    Ok(res)
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use specifications::dates::parse_datetime;

    fn year_2012() -> DateRange {
        DateRange::new(
            parse_datetime("2012-01-01 00:00:00").unwrap(),
            parse_datetime("2012-12-31 00:00:00").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn monthly_split_of_a_year_gives_twelve() {
        let segments = split_range(&year_2012(), SplitFrequency::Monthly);
        assert_eq!(segments.len(), 12);

        // Contiguous, covering the original range
        assert_eq!(segments[0].start_date, parse_datetime("2012-01-01 00:00:00").unwrap());
        assert_eq!(segments[11].end_date, parse_datetime("2012-12-31 00:00:00").unwrap());
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_date, pair[1].start_date);
        }
        // Aligned to month starts
        assert_eq!(segments[1].start_date, parse_datetime("2012-02-01 00:00:00").unwrap());
    }

    #[test]
    fn weekly_and_daily_splits_count_from_the_start() {
        let range = DateRange::new(
            parse_datetime("2012-01-01 00:00:00").unwrap(),
            parse_datetime("2012-01-22 00:00:00").unwrap(),
        )
        .unwrap();
        assert_eq!(split_range(&range, SplitFrequency::Weekly).len(), 3);
        assert_eq!(split_range(&range, SplitFrequency::Daily).len(), 21);
    }

    #[test]
    fn short_ranges_do_not_split() {
        let range = DateRange::new(
            parse_datetime("2012-01-05 00:00:00").unwrap(),
            parse_datetime("2012-01-20 00:00:00").unwrap(),
        )
        .unwrap();
        assert_eq!(split_range(&range, SplitFrequency::Monthly).len(), 1);
    }

    #[test]
    fn december_rolls_over_the_year() {
        let range = DateRange::new(
            parse_datetime("2012-11-15 00:00:00").unwrap(),
            parse_datetime("2013-01-15 00:00:00").unwrap(),
        )
        .unwrap();
        let segments = split_range(&range, SplitFrequency::Monthly);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].start_date, parse_datetime("2013-01-01 00:00:00").unwrap());
    }

    #[test]
    fn split_step_builds_a_linear_restart_chain() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = Blueprint::from_yaml(
            r#"
ROMSSimulation:
  name: year_run
  valid_date_range:
    start_date: "2012-01-01 00:00:00"
    end_date: "2012-12-31 00:00:00"
  base_model:
    source_repo: https://github.com/CESR-lab/ucla-roms.git
    checkout_target: main
  discretization:
    n_procs_x: 1
    n_procs_y: 1
    time_step: 60
  model_grid:
    location: /data/grid.nc
  initial_conditions:
    location: /data/ini.nc
"#,
        )
        .unwrap();
        let workplan = Workplan::from_yaml(
            "name: wp\ndescription: one long run plus a dependent\nsteps:\n  - name: year\n    application: roms_marbl\n    blueprint: ./year.yaml\n  - name: analyze\n    application: sleep\n    blueprint: ./analyze.yaml\n    depends_on: [year]\n",
        )
        .unwrap();

        let transformed = split_step(
            &workplan,
            "year",
            &blueprint,
            SplitFrequency::Monthly,
            dir.path().join("blueprints"),
            dir.path().join("outputs"),
        )
        .unwrap();

        // Twelve links plus the re-pointed dependent
        assert_eq!(transformed.steps.len(), 13);
        assert_eq!(transformed.steps[0].name, "year-01");
        assert!(transformed.steps[0].depends_on.is_empty());
        for i in 1..12 {
            assert_eq!(transformed.steps[i].depends_on, vec![format!("year-{:02}", i)]);
        }
        assert_eq!(transformed.steps[12].name, "analyze");
        assert_eq!(transformed.steps[12].depends_on, vec!["year-12".to_string()]);
        transformed.validate().unwrap();

        // Each link's initial conditions are the previous link's restart file
        let second = Blueprint::from_path(dir.path().join("blueprints/year-02.yaml")).unwrap();
        let initial = second.roms_component().unwrap().initial_conditions.as_ref().unwrap();
        assert_eq!(
            initial.location,
            dir.path().join("outputs/year-01").join(OUTPUT_DIR).join("year_run_rst.nc").display().to_string(),
        );
        // ...and its window is exactly February
        assert_eq!(second.valid_date_range.start_date, parse_datetime("2012-02-01 00:00:00").unwrap());
        assert_eq!(second.valid_date_range.end_date, parse_datetime("2012-03-01 00:00:00").unwrap());

        // The first link keeps the original initial conditions
        let first = Blueprint::from_path(dir.path().join("blueprints/year-01.yaml")).unwrap();
        assert_eq!(first.roms_component().unwrap().initial_conditions.as_ref().unwrap().location, "/data/ini.nc");
    }
}
