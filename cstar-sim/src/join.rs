//  JOIN.rs
//    by Lut99
//
//  Created:
//    10 Apr 2024, 11:21:33
//  Last edited:
//    11 Dec 2024, 18:02:09
//  Auto updated?
//    Yes
//
//  Description:
//!   Joins the per-rank netCDF files a partitioned model run leaves behind
//!   into whole-domain files. Groups are independent, so they fan out over
//!   a bounded pool of workers; each worker owns one external `ncjoin`
//!   invocation at a time.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;

use log::{debug, info};

pub use crate::errors::JoinError as Error;


/***** CONSTANTS *****/
/// The external tool that merges per-rank netCDF files.
pub const JOIN_TOOL: &str = "ncjoin";





/***** LIBRARY *****/
/// Finds the partitioned file groups in the given directory.
///
/// A partitioned file is named `<prefix>.<rank>.nc`; everything sharing a
/// prefix forms one group, returned with its members sorted by rank.
///
/// # Errors
/// This function errors if the directory cannot be listed.
pub fn partitioned_groups(dir: impl AsRef<Path>) -> Result<BTreeMap<String, Vec<PathBuf>>, Error> {
    let dir: &Path = dir.as_ref();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err)    => { return Err(Error::DirReadError{ path: dir.into(), err }); },
    };

    let mut groups: BTreeMap<String, Vec<(u32, PathBuf)>> = BTreeMap::new();
    for entry in entries.flatten() {
        let name: String = entry.file_name().to_string_lossy().into_owned();

        // Match `<prefix>.<digits>.nc`
        let Some(stem) = name.strip_suffix(".nc") else { continue };
        let Some((prefix, rank)) = stem.rsplit_once('.') else { continue };
        let Ok(rank) = rank.parse::<u32>() else { continue };
        if prefix.is_empty() { continue; }

        groups.entry(prefix.into()).or_default().push((rank, entry.path()));
    }

    Ok(groups
        .into_iter()
        .map(|(prefix, mut members)| {
            members.sort_by_key(|(rank, _)| *rank);
            (prefix, members.into_iter().map(|(_, path)| path).collect())
        })
        .collect())
}



/// Joins all partitioned file groups in the given directory, removing the
/// per-rank intermediates of every group that joined successfully.
///
/// At most `n_workers` joins run at once; the groups themselves are disjoint
/// so the workers never touch the same file.
///
/// # Returns
/// The joined (whole-domain) files, one per group.
///
/// # Errors
/// This function errors if listing fails, any join fails, or cleanup of a
/// joined group fails. Groups that already joined keep their results.
pub fn join_outputs(dir: impl AsRef<Path>, n_workers: usize) -> Result<Vec<PathBuf>, Error> {
    let dir: &Path = dir.as_ref();
    let groups: BTreeMap<String, Vec<PathBuf>> = partitioned_groups(dir)?;
    if groups.is_empty() {
        debug!("No partitioned files in '{}'; nothing to join", dir.display());
        return Ok(vec![]);
    }
    info!("Joining {} partitioned group(s) in '{}' with {} worker(s)", groups.len(), dir.display(), n_workers);

    let work: Vec<(String, Vec<PathBuf>)> = groups.into_iter().collect();
    let queue: Mutex<std::vec::IntoIter<(String, Vec<PathBuf>)>> = Mutex::new(work.into_iter());
    let results: Mutex<Vec<Result<PathBuf, Error>>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..n_workers.max(1) {
            scope.spawn(|| loop {
                let job: Option<(String, Vec<PathBuf>)> = queue.lock().map(|mut q| q.next()).unwrap_or(None);
                let (prefix, members): (String, Vec<PathBuf>) = match job {
                    Some(job) => job,
                    None      => break,
                };
                let res: Result<PathBuf, Error> = join_group(dir, &prefix, &members);
                if let Ok(results) = results.lock().as_mut() {
                    results.push(res);
                }
            });
        }
    });

    let mut joined: Vec<PathBuf> = Vec::new();
    for res in results.into_inner().unwrap_or_default() {
        joined.push(res?);
    }
    joined.sort();
    Ok(joined)
}



/// Joins one group of per-rank files and removes the intermediates.
fn join_group(dir: &Path, prefix: &str, members: &[PathBuf]) -> Result<PathBuf, Error> {
    let mut cmd: Command = Command::new(JOIN_TOOL);
    cmd.current_dir(dir);
    for member in members {
        cmd.arg(member);
    }

    debug!("Joining group '{}' ({} files)", prefix, members.len());
    let output: Output = match cmd.output() {
        Ok(output) => output,
        Err(err)   => { return Err(Error::JoinLaunchError{ command: JOIN_TOOL.into(), err }); },
    };
    if !output.status.success() {
        let mut log: String = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(Error::JoinFailure{ prefix: prefix.into(), status: output.status, log });
    }

    // The intermediates go once the whole-domain file exists
    for member in members {
        if let Err(err) = std::fs::remove_file(member) {
            return Err(Error::CleanupError{ path: member.clone(), err });
        }
    }
    Ok(dir.join(format!("{}.nc", prefix)))
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_prefix_and_sorts_by_rank() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["roms_his.2.nc", "roms_his.0.nc", "roms_his.1.nc", "roms_rst.0.nc", "roms_rst.1.nc", "roms_grd.nc", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let groups = partitioned_groups(dir.path()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups.get("roms_his").unwrap(),
            &vec![dir.path().join("roms_his.0.nc"), dir.path().join("roms_his.1.nc"), dir.path().join("roms_his.2.nc")],
        );
        assert_eq!(groups.get("roms_rst").unwrap().len(), 2);
        // The already-whole grid file is not a group
        assert!(!groups.contains_key("roms_grd"));
    }

    #[test]
    fn empty_directory_joins_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(join_outputs(dir.path(), 4).unwrap(), Vec::<PathBuf>::new());
    }
}
