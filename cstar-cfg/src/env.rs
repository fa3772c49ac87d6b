//  ENV.rs
//    by Lut99
//
//  Created:
//    18 Mar 2024, 09:36:20
//  Last edited:
//    11 Dec 2024, 10:12:51
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the persistent environment store: a flat `KEY=VALUE` file
//!   read once at first use and written atomically. Cross-process races
//!   resolve to last-writer-wins; a corrupted file is warned about and
//!   re-initialized on the next write.
//

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::NamedTempFile;

pub use crate::errors::EnvStoreError as Error;
use crate::spec::env_store_path;


/***** LIBRARY *****/
/// A handle on the per-user key/value store at `~/.cstar.env` (or
/// `$CSTAR_HOME/.cstar.env`).
///
/// Reads happen once at open; writes rewrite the whole file through a
/// temporary file and a rename. Callers within one process are expected to
/// serialize their writes themselves.
#[derive(Clone, Debug)]
pub struct EnvStore {
    /// The file this store is backed by.
    path   : PathBuf,
    /// The key/value pairs as read at open time, plus any local mutations.
    values : BTreeMap<String, String>,
}

impl EnvStore {
    /// Opens the store at its default location.
    ///
    /// # Errors
    /// This function errors if the default location cannot be resolved or the
    /// file exists but cannot be read at all. A file with unparseable _lines_
    /// is not an error; those lines are warned about and dropped.
    pub fn open_default() -> Result<Self, Error> {
        Self::open(env_store_path()?)
    }

    /// Opens the store backed by the given file, which does not need to exist yet.
    ///
    /// # Errors
    /// This function errors if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path: PathBuf = path.into();

        let mut values: BTreeMap<String, String> = BTreeMap::new();
        if path.exists() {
            let raw: String = match fs::read_to_string(&path) {
                Ok(raw)  => raw,
                Err(err) => { return Err(Error::FileReadError{ path, err }); },
            };
            for (i, line) in raw.lines().enumerate() {
                let line: &str = line.trim();
                if line.is_empty() || line.starts_with('#') { continue; }
                match line.split_once('=') {
                    Some((key, value)) if !key.trim().is_empty() => {
                        values.insert(key.trim().into(), value.trim().into());
                    },
                    _ => {
                        warn!("Ignoring corrupted line {} in environment store '{}'", i + 1, path.display());
                    },
                }
            }
        }

        debug!("Opened environment store '{}' with {} entries", path.display(), values.len());
        Ok(Self{ path, values })
    }



    /// Returns the value stored under the given key, if any.
    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.values.get(key.as_ref()).map(String::as_str)
    }

    /// Sets the given key to the given value in memory. Call [`EnvStore::save()`] to persist.
    #[inline]
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Removes the given key in memory. Call [`EnvStore::save()`] to persist.
    #[inline]
    pub fn unset(&mut self, key: impl AsRef<str>) -> Option<String> {
        self.values.remove(key.as_ref())
    }

    /// Returns an iterator over all key/value pairs, sorted by key.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the file this store is backed by.
    #[inline]
    pub fn path(&self) -> &Path { &self.path }



    /// Writes the store back to disk.
    ///
    /// The write is atomic: the new contents go to a temporary file in the
    /// same directory, which is then renamed over the store file. Concurrent
    /// writers from other processes race as last-writer-wins.
    ///
    /// # Errors
    /// This function errors if the temporary file cannot be created, written
    /// or renamed into place.
    pub fn save(&self) -> Result<(), Error> {
        let dir: &Path = self.path.parent().unwrap_or_else(|| Path::new("."));
        if !dir.exists() {
            if let Err(err) = fs::create_dir_all(dir) {
                return Err(Error::DirCreateError{ path: dir.into(), err });
            }
        }

        let mut tmp: NamedTempFile = match NamedTempFile::new_in(dir) {
            Ok(tmp)  => tmp,
            Err(err) => { return Err(Error::TempFileError{ dir: dir.into(), err }); },
        };
        for (key, value) in &self.values {
            if let Err(err) = writeln!(tmp, "{}={}", key, value) {
                return Err(Error::TempWriteError{ path: tmp.path().into(), err });
            }
        }
        if let Err(err) = tmp.persist(&self.path) {
            return Err(Error::PersistError{ path: self.path.clone(), err: err.error });
        }

        debug!("Persisted environment store '{}' ({} entries)", self.path.display(), self.values.len());
        Ok(())
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cstar.env");

        let mut store = EnvStore::open(&path).unwrap();
        store.set("ROMS_ROOT", "/opt/codebases/roms");
        store.set("MARBL_ROOT", "/opt/codebases/marbl");
        store.save().unwrap();

        let store2 = EnvStore::open(&path).unwrap();
        assert_eq!(store2.get("ROMS_ROOT"), Some("/opt/codebases/roms"));
        assert_eq!(store2.get("MARBL_ROOT"), Some("/opt/codebases/marbl"));
        assert_eq!(store2.iter().count(), 2);
    }

    #[test]
    fn corrupted_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cstar.env");
        fs::write(&path, "GOOD=yes\nthis line is garbage\n# a comment\n=nokey\n").unwrap();

        let store = EnvStore::open(&path).unwrap();
        assert_eq!(store.get("GOOD"), Some("yes"));
        assert_eq!(store.iter().count(), 1);
    }

    #[test]
    fn unset_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cstar.env");

        let mut store = EnvStore::open(&path).unwrap();
        store.set("KEY", "value");
        assert_eq!(store.unset("KEY"), Some("value".into()));
        store.save().unwrap();

        assert_eq!(EnvStore::open(&path).unwrap().iter().count(), 0);
    }

    #[test]
    fn last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cstar.env");

        let mut a = EnvStore::open(&path).unwrap();
        let mut b = EnvStore::open(&path).unwrap();
        a.set("KEY", "from-a");
        b.set("KEY", "from-b");
        a.save().unwrap();
        b.save().unwrap();

        assert_eq!(EnvStore::open(&path).unwrap().get("KEY"), Some("from-b"));
    }
}
