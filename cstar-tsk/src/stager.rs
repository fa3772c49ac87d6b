//  STAGER.rs
//    by Lut99
//
//  Created:
//    26 Mar 2024, 11:12:39
//  Last edited:
//    11 Dec 2024, 11:59:14
//  Auto updated?
//    Yes
//
//  Description:
//!   Turns a [`DataSource`] into a working copy on disk: single files are
//!   copied or downloaded into the target directory, repository sources
//!   are cloned to a scratch cache from which only the listed files are
//!   copied over. Staging is idempotent; a file that is already present
//!   with a matching hash is left untouched.
//

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use cstar_cfg::spec::{cstar_home, fresh_codebases};

pub use crate::errors::StageError as Error;
use crate::retrieval::{self, sha256_file};
use crate::spec::{DataSource, Location};


/***** HELPER FUNCTIONS *****/
/// Makes sure the given directory exists.
fn ensure_dir(path: &Path) -> Result<(), Error> {
    if !path.exists() {
        if let Err(err) = fs::create_dir_all(path) {
            return Err(Error::DirCreateError{ path: path.into(), err });
        }
    }
    Ok(())
}

/// Copies `from` to `to` unless `to` already has identical contents.
///
/// Keeping byte-identical targets untouched is what makes re-staging leave
/// mtimes alone.
fn copy_if_changed(from: &Path, to: &Path) -> Result<(), Error> {
    if to.exists() {
        let same: bool = match (fs::read(from), fs::read(to)) {
            (Ok(a), Ok(b)) => a == b,
            _              => false,
        };
        if same {
            debug!("'{}' already staged and unchanged; skipping", to.display());
            return Ok(());
        }
    }
    if let Err(err) = fs::copy(from, to) {
        return Err(Error::CopyError{ source: from.into(), target: to.into(), err });
    }
    Ok(())
}

/// Returns the scratch cache directory for the given repository source.
///
/// Clones are keyed on `(url, ref)` so they may be reused across simulations.
fn repo_cache_dir(source: &DataSource) -> PathBuf {
    let name: String = source.basename();
    let name: &str = name.trim_end_matches(".git");
    let target: &str = source.checkout_target.as_deref().unwrap_or("HEAD");

    let base: PathBuf = cstar_home().map(|h| h.join("cache").join("repos")).unwrap_or_else(|_| PathBuf::from(".cstar-cache"));
    base.join(format!("{}-{}", name, target.replace('/', "-")))
}





/***** LIBRARY *****/
/// Stages a single-file source into the given directory.
///
/// Re-staging a file that is already present with a matching hash is a no-op
/// (the file is not even touched, keeping its mtime). A present file with a
/// mismatching hash is an error unless `force` is given, in which case it is
/// replaced.
///
/// # Returns
/// The path of the staged file, which is also recorded in the source's
/// `working_path`.
///
/// # Errors
/// This function errors if the file cannot be copied or downloaded, or an
/// already-staged copy conflicts without `force`.
pub async fn stage_file(source: &mut DataSource, target_dir: impl AsRef<Path>, force: bool) -> Result<PathBuf, Error> {
    let target_dir: &Path = target_dir.as_ref();
    ensure_dir(target_dir)?;
    let dest: PathBuf = target_dir.join(source.basename());

    // Idempotence: an existing file with the right hash is left alone
    if dest.exists() {
        match &source.file_hash {
            Some(expected) => {
                let got: String = sha256_file(&dest).map_err(|err| Error::RetrieveError{ err })?;
                if &got == expected {
                    debug!("'{}' already staged with matching hash; skipping", dest.display());
                    source.working_path = Some(dest.clone());
                    return Ok(dest);
                }
                if !force {
                    return Err(Error::StaleTarget{ path: dest, expected: expected.clone(), got });
                }
                warn!("Replacing '{}' (hash mismatch, force given)", dest.display());
            },
            None => {
                debug!("'{}' already staged (no hash to verify); skipping", dest.display());
                source.working_path = Some(dest.clone());
                return Ok(dest);
            },
        }
    }

    match &source.location {
        Location::Url{ url } => {
            retrieval::fetch_file(url, &dest, source.file_hash.as_deref()).await.map_err(|err| Error::RetrieveError{ err })?;
        },
        Location::Path{ path } => {
            if !path.exists() { return Err(Error::SourceNotFound{ path: path.clone() }); }
            if let Err(err) = fs::copy(path, &dest) {
                return Err(Error::CopyError{ source: path.clone(), target: dest, err });
            }
            // Local hashes are advisory: warn, do not fail
            if let Some(expected) = &source.file_hash {
                let got: String = sha256_file(&dest).map_err(|err| Error::RetrieveError{ err })?;
                if &got != expected {
                    warn!("Local file '{}' hashes to {}, expected {}", path.display(), got, expected);
                }
            }
        },
    }

    source.working_path = Some(dest.clone());
    Ok(dest)
}



/// Stages the listed files of a repository source into the given directory.
///
/// The repository is cloned to a scratch cache (reused across simulations
/// sharing the same `(url, ref)`, unless `$CSTAR_FRESH_CODEBASES=1`), after
/// which only the listed files, taken from the source's `subdir` if it has
/// one, are copied to the target.
///
/// # Returns
/// The paths of the staged files, in list order. The target directory is
/// recorded in the source's `working_path`.
///
/// # Errors
/// This function errors if the clone fails, a listed file is missing from
/// the repository, or copying fails.
pub async fn stage_repo_files(source: &mut DataSource, files: &[String], target_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, Error> {
    let target_dir: &Path = target_dir.as_ref();
    ensure_dir(target_dir)?;

    let url: String = source.location.to_string();
    let target: &str = source.checkout_target.as_deref().unwrap_or("HEAD");

    // Clone (or reuse) the scratch copy
    let cache: PathBuf = repo_cache_dir(source);
    if fresh_codebases() && cache.exists() {
        debug!("Removing cached clone '{}' (fresh codebases requested)", cache.display());
        if let Err(err) = fs::remove_dir_all(&cache) {
            return Err(Error::DirCreateError{ path: cache.clone(), err });
        }
    }
    ensure_dir(cache.parent().unwrap_or_else(|| Path::new(".")))?;
    retrieval::fetch_repo(&url, target, &cache).map_err(|err| Error::RetrieveError{ err })?;

    // Copy the listed files (only) over
    let from_dir: PathBuf = match &source.subdir {
        Some(subdir) => cache.join(subdir),
        None         => cache.clone(),
    };
    let mut res: Vec<PathBuf> = Vec::with_capacity(files.len());
    for file in files {
        let from: PathBuf = from_dir.join(file);
        if !from.exists() {
            return Err(Error::MissingRepoFile{ repo: url, file: file.clone() });
        }
        let to: PathBuf = target_dir.join(file);
        if let Some(parent) = to.parent() { ensure_dir(parent)?; }
        copy_if_changed(&from, &to)?;
        res.push(to);
    }

    source.working_path = Some(target_dir.into());
    Ok(res)
}



/// Stages the listed files of a local-directory source into the given directory.
///
/// This is the non-repository sibling of [`stage_repo_files()`]: files are
/// copied straight from the source directory (plus `subdir`, if any).
///
/// # Errors
/// This function errors if a listed file does not exist or copying fails.
pub fn stage_local_files(source: &mut DataSource, files: &[String], target_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, Error> {
    let target_dir: &Path = target_dir.as_ref();
    ensure_dir(target_dir)?;

    let from_dir: PathBuf = match (&source.location, &source.subdir) {
        (Location::Path{ path }, Some(subdir)) => path.join(subdir),
        (Location::Path{ path }, None)         => path.clone(),
        (Location::Url{ url }, _)              => { return Err(Error::SourceNotFound{ path: PathBuf::from(url) }); },
    };

    let mut res: Vec<PathBuf> = Vec::with_capacity(files.len());
    for file in files {
        let from: PathBuf = from_dir.join(file);
        if !from.exists() { return Err(Error::SourceNotFound{ path: from }); }
        let to: PathBuf = target_dir.join(file);
        if let Some(parent) = to.parent() { ensure_dir(parent)?; }
        copy_if_changed(&from, &to)?;
        res.push(to);
    }

    source.working_path = Some(target_dir.into());
    Ok(res)
}



/// Asserts that every listed file exists under the given directory.
///
/// Used as the staging post-condition: the file list and the staged
/// directory must agree.
///
/// # Errors
/// This function errors on the first missing file.
pub fn assert_staged(dir: impl AsRef<Path>, files: &[String]) -> Result<(), Error> {
    let dir: &Path = dir.as_ref();
    for file in files {
        if !dir.join(file).exists() {
            return Err(Error::MissingStagedFile{ dir: dir.into(), file: file.clone() });
        }
    }
    Ok(())
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Location;

    fn local_source(path: PathBuf, hash: Option<&str>) -> DataSource {
        DataSource {
            location         : Location::Path{ path },
            checkout_target  : None,
            subdir           : None,
            file_hash        : hash.map(String::from),
            valid_date_range : None,
            working_path     : None,
        }
    }

    #[tokio::test]
    async fn staging_copies_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.nc");
        std::fs::write(&src, b"not really netcdf").unwrap();
        let target = dir.path().join("workdir");

        let mut source = local_source(src, None);
        let staged = stage_file(&mut source, &target, false).await.unwrap();
        assert_eq!(staged, target.join("input.nc"));
        assert!(staged.exists());
        assert_eq!(source.working_path(), Some(staged.as_path()));
    }

    #[tokio::test]
    async fn restaging_with_matching_hash_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.nc");
        std::fs::write(&src, b"hello world\n").unwrap();
        let target = dir.path().join("workdir");
        let hash: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

        let mut source = local_source(src, Some(hash));
        let staged = stage_file(&mut source, &target, false).await.unwrap();
        let mtime = std::fs::metadata(&staged).unwrap().modified().unwrap();

        // Second staging must not touch the file
        let mut source2 = local_source(dir.path().join("input.nc"), Some(hash));
        stage_file(&mut source2, &target, false).await.unwrap();
        assert_eq!(std::fs::metadata(&staged).unwrap().modified().unwrap(), mtime);
    }

    #[tokio::test]
    async fn conflicting_staged_file_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.nc");
        std::fs::write(&src, b"hello world\n").unwrap();
        let target = dir.path().join("workdir");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("input.nc"), b"something else entirely").unwrap();
        let hash: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

        let mut source = local_source(src.clone(), Some(hash));
        assert!(matches!(stage_file(&mut source, &target, false).await, Err(Error::StaleTarget{ .. })));

        // With force, the stale copy is replaced
        let mut source = local_source(src, Some(hash));
        stage_file(&mut source, &target, true).await.unwrap();
        assert_eq!(std::fs::read(target.join("input.nc")).unwrap(), b"hello world\n");
    }

    #[test]
    fn local_file_sets_stage_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("src");
        std::fs::create_dir_all(from.join("namelists")).unwrap();
        std::fs::write(from.join("namelists/roms.in_TEMPLATE"), b"title:\n").unwrap();
        std::fs::write(from.join("namelists/marbl_in"), b"x = 1\n").unwrap();

        let target = dir.path().join("workdir");
        let files = vec!["roms.in_TEMPLATE".to_string(), "marbl_in".to_string()];
        let mut source = DataSource {
            location         : Location::Path{ path: from },
            checkout_target  : None,
            subdir           : Some(PathBuf::from("namelists")),
            file_hash        : None,
            valid_date_range : None,
            working_path     : None,
        };

        let staged = stage_local_files(&mut source, &files, &target).unwrap();
        assert_eq!(staged, vec![target.join("roms.in_TEMPLATE"), target.join("marbl_in")]);
        assert_staged(&target, &files).unwrap();

        // Re-staging identical files leaves them untouched
        let mtime = std::fs::metadata(&staged[0]).unwrap().modified().unwrap();
        stage_local_files(&mut source, &files, &target).unwrap();
        assert_eq!(std::fs::metadata(&staged[0]).unwrap().modified().unwrap(), mtime);
        assert!(matches!(
            assert_staged(&target, &["missing.opt".to_string()]),
            Err(Error::MissingStagedFile{ .. }),
        ));
    }
}
