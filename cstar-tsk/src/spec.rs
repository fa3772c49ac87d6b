//  SPEC.rs
//    by Lut99
//
//  Created:
//    25 Mar 2024, 09:31:44
//  Last edited:
//    09 Dec 2024, 16:10:27
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the [`DataSource`]: the in-memory form of any referenced
//!   artifact (a file, a repository, a recipe), plus where its working copy
//!   ended up once staged.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use specifications::blueprint::{AdditionalCodeRef, DatasetRef};
use specifications::dates::DateRange;


/***** LIBRARY *****/
/// Where a resource lives: on the network or on this filesystem.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    /// An HTTP(S) or git URL.
    Url{ url: String },
    /// A local filesystem path.
    Path{ path: PathBuf },
}

impl Location {
    /// Classifies the given raw location string.
    pub fn parse(raw: impl AsRef<str>) -> Self {
        let raw: &str = raw.as_ref();
        if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with("git@") || raw.starts_with("ssh://") {
            Self::Url{ url: raw.into() }
        } else {
            Self::Path{ path: raw.into() }
        }
    }

    /// Returns whether this location is remote.
    #[inline]
    pub fn is_remote(&self) -> bool { matches!(self, Self::Url{ .. }) }

    /// Returns the last path segment of the location (e.g., the file name).
    pub fn basename(&self) -> String {
        match self {
            Self::Url{ url }   => url.trim_end_matches('/').rsplit('/').next().unwrap_or(url).into(),
            Self::Path{ path } => path.file_name().map(|n| n.to_string_lossy().into()).unwrap_or_default(),
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        match self {
            Self::Url{ url }   => write!(f, "{}", url),
            Self::Path{ path } => write!(f, "{}", path.display()),
        }
    }
}



/// A referenced artifact, before and after staging.
///
/// Once staged, `working_path` points at the materialized copy and, when
/// `file_hash` was provided, the copy's contents are known to match it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DataSource {
    /// Where the artifact comes from.
    pub location         : Location,
    /// The git ref to check out, when the location is a repository.
    pub checkout_target  : Option<String>,
    /// The subdirectory of interest, when the location is a repository.
    pub subdir           : Option<PathBuf>,
    /// Expected SHA-256 of the artifact, lowercase hex.
    pub file_hash        : Option<String>,
    /// The period the artifact is valid for, when it carries data.
    pub valid_date_range : Option<DateRange>,
    /// Where the staged working copy lives. `None` until staged.
    pub working_path     : Option<PathBuf>,
}

impl DataSource {
    /// Builds a source for a plain file (or recipe) reference from a blueprint.
    pub fn from_dataset_ref(dsref: &DatasetRef) -> Self {
        Self {
            location         : Location::parse(&dsref.location),
            checkout_target  : None,
            subdir           : None,
            file_hash        : dsref.file_hash.clone(),
            valid_date_range : dsref.date_range(),
            working_path     : None,
        }
    }

    /// Builds a source for an additional-code reference from a blueprint.
    pub fn from_code_ref(cref: &AdditionalCodeRef) -> Self {
        Self {
            location         : Location::parse(&cref.location),
            checkout_target  : cref.checkout_target.clone(),
            subdir           : cref.subdir.as_ref().map(PathBuf::from),
            file_hash        : None,
            valid_date_range : None,
            working_path     : None,
        }
    }

    /// Returns the staged working path, if staging has happened.
    #[inline]
    pub fn working_path(&self) -> Option<&Path> { self.working_path.as_deref() }

    /// Returns the file name this source stages under.
    #[inline]
    pub fn basename(&self) -> String { self.location.basename() }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_classify() {
        assert!(Location::parse("https://example.com/data.nc").is_remote());
        assert!(Location::parse("git@github.com:org/repo.git").is_remote());
        assert!(!Location::parse("/data/local.nc").is_remote());
        assert!(!Location::parse("relative/file.yaml").is_remote());
    }

    #[test]
    fn basenames() {
        assert_eq!(Location::parse("https://example.com/raw/main/roms_grd.yaml").basename(), "roms_grd.yaml");
        assert_eq!(Location::parse("/data/inputs/roms_ini.nc").basename(), "roms_ini.nc");
        assert_eq!(Location::parse("https://example.com/repo/").basename(), "repo");
    }
}
