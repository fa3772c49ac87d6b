//  RETRIEVAL.rs
//    by Lut99
//
//  Created:
//    25 Mar 2024, 10:05:23
//  Last edited:
//    11 Dec 2024, 11:38:46
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements deterministic acquisition of remote artifacts: streamed
//!   HTTP downloads with SHA-256 verification and atomic placement, and
//!   git clones pinned to a detached ref. Transport failures are retried
//!   with exponential backoff; hash mismatches get exactly one fresh
//!   re-fetch before they are fatal.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::build::CheckoutBuilder;
use git2::{FetchOptions, Repository};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

pub use crate::errors::RetrieveError as Error;


/***** CONSTANTS *****/
/// How long to wait for a connection to be established.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a whole download may take.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How often a transport-level failure is attempted in total.
pub const N_ATTEMPTS: u32 = 3;





/***** HELPER FUNCTIONS *****/
/// Sleeps for the exponential-backoff delay of the given (zero-indexed) attempt: 1s, 2s, 4s, ...
async fn backoff(attempt: u32) {
    let delay: Duration = Duration::from_secs(1 << attempt);
    debug!("Backing off for {}s before retry", delay.as_secs());
    tokio::time::sleep(delay).await;
}

/// Downloads the given URL once into a temporary file in `dir`, hashing as it streams.
async fn download_once(client: &reqwest::Client, url: &str, dir: &Path) -> Result<(NamedTempFile, String), Error> {
    let mut resp: reqwest::Response = match client.get(url).send().await {
        Ok(resp) => resp,
        Err(err) => { return Err(Error::RequestError{ url: url.into(), err }); },
    };
    if !resp.status().is_success() {
        return Err(Error::RequestFailure{ url: url.into(), status: resp.status() });
    }

    let mut tmp: NamedTempFile = match NamedTempFile::new_in(dir) {
        Ok(tmp)  => tmp,
        Err(err) => { return Err(Error::TempFileError{ dir: dir.into(), err }); },
    };
    let mut hasher: Sha256 = Sha256::new();
    loop {
        let chunk = match resp.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None)        => break,
            Err(err)        => { return Err(Error::DownloadError{ url: url.into(), err }); },
        };
        hasher.update(&chunk);
        if let Err(err) = tmp.write_all(&chunk) {
            return Err(Error::TempWriteError{ path: tmp.path().into(), err });
        }
    }

    Ok((tmp, hex::encode(hasher.finalize())))
}

/// Returns whether the given checkout target is a full commit hash rather
/// than a branch or tag name.
///
/// Abbreviated hashes are not recognized here; they cannot be fetched by
/// name anyway, so they go down the full-clone path like branches whose
/// shallow fetch fails.
fn is_commit_hash(target: &str) -> bool {
    target.len() == 40 && target.chars().all(|c| c.is_ascii_hexdigit())
}

/// Clones a plain, full-history copy of the given repository.
fn clone_full(url: &str, dest: &Path) -> Result<Repository, Error> {
    debug!("Cloning '{}' (full) to '{}'...", url, dest.display());
    match Repository::clone(url, dest) {
        Ok(repo) => Ok(repo),
        Err(err) => Err(Error::CloneError{ url: url.into(), target: dest.into(), err }),
    }
}

/// Shallow-clones only the tip of the given branch or tag: an `init`, a
/// depth-1 fetch of that one ref, and a detached checkout of `FETCH_HEAD`.
fn clone_shallow(url: &str, target: &str, dest: &Path) -> Result<Repository, git2::Error> {
    let repo: Repository = Repository::init(dest)?;
    {
        let mut remote: git2::Remote = repo.remote("origin", url)?;
        let mut opts: FetchOptions = FetchOptions::new();
        opts.depth(1);
        opts.download_tags(git2::AutotagOption::None);
        remote.fetch(&[target], Some(&mut opts), None)?;

        let fetch_head: git2::Reference = repo.find_reference("FETCH_HEAD")?;
        let oid: git2::Oid = match fetch_head.target() {
            Some(oid) => oid,
            None      => { return Err(git2::Error::from_str("FETCH_HEAD is not a direct reference")); },
        };
        // Tags may point at a tag object; peel down to the commit
        let commit: git2::Object = repo.find_object(oid, None)?.peel(git2::ObjectType::Commit)?;
        repo.checkout_tree(&commit, Some(CheckoutBuilder::new().force()))?;
        repo.set_head_detached(commit.id())?;
    }
    debug!("Shallow-cloned '{}' at '{}' to '{}'", url, target, dest.display());
    Ok(repo)
}

/// Resolves the given checkout target in the given repository, trying the
/// remote-tracking spelling when the plain one does not exist.
fn resolve_target<'r>(repo: &'r Repository, url: &str, target: &str) -> Result<git2::Object<'r>, Error> {
    match repo.revparse_single(target) {
        Ok(obj) => Ok(obj),
        Err(_)  => match repo.revparse_single(&format!("origin/{}", target)) {
            Ok(obj)  => Ok(obj),
            Err(err) => Err(Error::UnknownRef{ url: url.into(), target: target.into(), err }),
        },
    }
}

/// Checks the given target out, detached.
fn checkout_detached(repo: &Repository, path: &Path, url: &str, target: &str) -> Result<(), Error> {
    let obj: git2::Object = resolve_target(repo, url, target)?;
    let oid: git2::Oid = obj.id();

    if let Err(err) = repo.checkout_tree(&obj, Some(CheckoutBuilder::new().force())) {
        return Err(Error::CheckoutError{ path: path.into(), target: target.into(), err });
    }
    if let Err(err) = repo.set_head_detached(oid) {
        return Err(Error::CheckoutError{ path: path.into(), target: target.into(), err });
    }

    debug!("Checked out '{}' (detached at {}) in '{}'", target, oid, path.display());
    Ok(())
}





/***** LIBRARY *****/
/// The ways a pre-existing directory can relate to a wanted `(remote, ref)` pair.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RepoStatus {
    /// It is a clone of the wanted remote, checked out at the wanted ref.
    Matches,
    /// It is a clone of some other remote.
    WrongRemote,
    /// It is a clone of the wanted remote, but at another (or an unknown) ref.
    WrongRef,
    /// It is not a git repository at all.
    NotARepo,
}

impl Display for RepoStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use RepoStatus::*;
        match self {
            Matches     => write!(f, "matches"),
            WrongRemote => write!(f, "wrong-remote"),
            WrongRef    => write!(f, "wrong-ref"),
            NotARepo    => write!(f, "not-a-repo"),
        }
    }
}



/// Computes the SHA-256 of the given file, in lowercase hex.
///
/// # Errors
/// This function errors if the file cannot be read.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String, Error> {
    use std::io::Read;
    let path: &Path = path.as_ref();

    let mut handle: std::fs::File = match std::fs::File::open(path) {
        Ok(handle) => handle,
        Err(err)   => { return Err(Error::FileReadError{ path: path.into(), err }); },
    };

    // Read through it in chunks
    let mut hasher: Sha256 = Sha256::new();
    let mut buf: [u8; 1024 * 16] = [0; 1024 * 16];
    loop {
        let n_bytes: usize = match handle.read(&mut buf) {
            Ok(n_bytes) => n_bytes,
            Err(err)    => { return Err(Error::FileReadError{ path: path.into(), err }); },
        };
        if n_bytes == 0 { break; }
        hasher.update(&buf[..n_bytes]);
    }

    Ok(hex::encode(hasher.finalize()))
}



/// Downloads the given URL to the given destination path.
///
/// The body streams to a temporary file in the destination's directory while
/// being hashed, and is renamed into place only once complete (and, when
/// `expected_hash` is given, verified). Transport failures are retried up to
/// [`N_ATTEMPTS`] times with exponential backoff; a hash mismatch triggers
/// exactly one fresh re-fetch before becoming fatal. On failure, nothing is
/// left at the destination.
///
/// # Errors
/// This function errors if the download keeps failing, the destination cannot
/// be written, or the final bytes do not match `expected_hash`.
pub async fn fetch_file(url: impl AsRef<str>, dest: impl AsRef<Path>, expected_hash: Option<&str>) -> Result<PathBuf, Error> {
    let url: &str = url.as_ref();
    let dest: &Path = dest.as_ref();
    debug!("Fetching '{}' to '{}'...", url, dest.display());

    let client: reqwest::Client = match reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).timeout(TOTAL_TIMEOUT).build() {
        Ok(client) => client,
        Err(err)   => { return Err(Error::ClientBuildError{ err }); },
    };
    let dir: &Path = dest.parent().unwrap_or_else(|| Path::new("."));

    // One extra outer round for the fresh re-fetch after a hash mismatch
    let mut hash_retried: bool = false;
    loop {
        // Inner transport-retry loop
        let mut attempt: u32 = 0;
        let (tmp, hash): (NamedTempFile, String) = loop {
            match download_once(&client, url, dir).await {
                Ok(res) => break res,
                Err(err @ (Error::RequestError{ .. } | Error::DownloadError{ .. })) => {
                    attempt += 1;
                    if attempt >= N_ATTEMPTS { return Err(err); }
                    warn!("Transient fetch failure for '{}' (attempt {}/{}): {}", url, attempt, N_ATTEMPTS, err);
                    backoff(attempt - 1).await;
                },
                Err(err) => { return Err(err); },
            }
        };

        // Verify, if asked to
        if let Some(expected) = expected_hash {
            if hash != expected {
                // The temp file is dropped (and thus deleted) here; the target is untouched
                if !hash_retried {
                    hash_retried = true;
                    warn!("Hash mismatch for '{}' (got {}, expected {}); re-fetching once", url, hash, expected);
                    continue;
                }
                return Err(Error::HashMismatch{ source: url.into(), expected: expected.into(), got: hash });
            }
        }

        // Move it into place atomically
        if let Err(err) = tmp.persist(dest) {
            return Err(Error::PersistError{ path: dest.into(), err: err.error });
        }
        debug!("Fetched '{}' to '{}' (sha256 {})", url, dest.display(), hash);
        return Ok(dest.into());
    }
}



/// Clones the given repository to the given destination and checks out the
/// given ref, detached.
///
/// A branch or tag target is cloned shallow (depth 1, that one ref only),
/// falling back to a full clone when the shallow fetch does not resolve; a
/// full commit hash is always cloned full, since servers generally refuse
/// to serve arbitrary hashes shallowly.
///
/// A pre-existing clone at the destination is reused when its `origin`
/// matches; when the ref is not present locally, the remote is fetched
/// first. A pre-existing clone of another remote is an error.
///
/// # Errors
/// This function errors if cloning, fetching or checking out fails.
pub fn fetch_repo(url: impl AsRef<str>, target: impl AsRef<str>, dest: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let url: &str = url.as_ref();
    let target: &str = target.as_ref();
    let dest: &Path = dest.as_ref();

    // Reuse a matching clone that is already there
    if dest.join(".git").exists() {
        let repo: Repository = match Repository::open(dest) {
            Ok(repo) => repo,
            Err(err) => { return Err(Error::RepoOpenError{ path: dest.into(), err }); },
        };

        // Reject clones of other remotes outright
        let origin: String = repo.find_remote("origin").ok().and_then(|r| r.url().map(String::from)).unwrap_or_default();
        if origin != url {
            return Err(Error::RemoteMismatch{ path: dest.into(), expected: url.into(), got: origin });
        }

        // Fetch only when the ref is not already available
        if repo.revparse_single(target).is_err() && repo.revparse_single(&format!("origin/{}", target)).is_err() {
            debug!("Ref '{}' not present in '{}'; fetching...", target, dest.display());
            let mut remote: git2::Remote = match repo.find_remote("origin") {
                Ok(remote) => remote,
                Err(err)   => { return Err(Error::FetchError{ path: dest.into(), err }); },
            };
            if let Err(err) = remote.fetch(&[] as &[&str], None, None) {
                return Err(Error::FetchError{ path: dest.into(), err });
            }
        }

        checkout_detached(&repo, dest, url, target)?;
        return Ok(dest.into());
    }

    // Commit pins need the full history to resolve
    if is_commit_hash(target) {
        let repo: Repository = clone_full(url, dest)?;
        checkout_detached(&repo, dest, url, target)?;
        return Ok(dest.into());
    }

    // Branches and tags go shallow; a failed shallow fetch (odd ref, server
    // without shallow support) falls back to the full path
    debug!("Cloning '{}' (shallow at '{}') to '{}'...", url, target, dest.display());
    match clone_shallow(url, target, dest) {
        Ok(_) => Ok(dest.into()),
        Err(err) => {
            warn!("Shallow clone of '{}' at '{}' failed ({}); falling back to a full clone", url, target, err);
            if dest.exists() {
                if let Err(err) = std::fs::remove_dir_all(dest) {
                    return Err(Error::CloneError{ url: url.into(), target: dest.into(), err: git2::Error::from_str(&err.to_string()) });
                }
            }
            let repo: Repository = clone_full(url, dest)?;
            checkout_detached(&repo, dest, url, target)?;
            Ok(dest.into())
        },
    }
}



/// Classifies a pre-existing directory against a wanted `(remote, ref)` pair.
pub fn verify_local(path: impl AsRef<Path>, remote: impl AsRef<str>, target: impl AsRef<str>) -> RepoStatus {
    let path: &Path = path.as_ref();
    let remote: &str = remote.as_ref();
    let target: &str = target.as_ref();

    let repo: Repository = match Repository::open(path) {
        Ok(repo) => repo,
        Err(_)   => { return RepoStatus::NotARepo; },
    };

    let origin: String = repo.find_remote("origin").ok().and_then(|r| r.url().map(String::from)).unwrap_or_default();
    if origin != remote { return RepoStatus::WrongRemote; }

    let wanted: git2::Oid = match resolve_target(&repo, remote, target) {
        Ok(obj) => obj.id(),
        Err(_)  => { return RepoStatus::WrongRef; },
    };
    let head: Option<git2::Oid> = repo.head().ok().and_then(|h| h.peel_to_commit().ok()).map(|c| c.id());

    match head {
        Some(head) if head == wanted => RepoStatus::Matches,
        _                            => RepoStatus::WrongRef,
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world\n").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447",
        );
    }

    #[test]
    fn commit_hashes_are_told_apart_from_refs() {
        assert!(is_commit_hash("0123456789abcdef0123456789abcdef01234567"));
        assert!(is_commit_hash("EE2BA557BD45645A8DDD5DA464A88B382A078265"));
        assert!(!is_commit_hash("main"));
        assert!(!is_commit_hash("marbl0.45.0"));
        // Abbreviated hashes count as refs (they need the full-clone path anyway)
        assert!(!is_commit_hash("deadbeef"));
    }

    #[test]
    fn verify_local_on_plain_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            verify_local(dir.path(), "https://example.com/repo.git", "main"),
            RepoStatus::NotARepo,
        );
    }

    #[test]
    fn verify_local_against_scratch_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://example.com/repo.git").unwrap();

        // An empty repo of the right remote has no resolvable refs
        assert_eq!(
            verify_local(dir.path(), "https://example.com/repo.git", "main"),
            RepoStatus::WrongRef,
        );
        assert_eq!(
            verify_local(dir.path(), "https://example.com/other.git", "main"),
            RepoStatus::WrongRemote,
        );

        // Commit something so HEAD resolves, then check match detection
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_id = { let mut index = repo.index().unwrap(); index.write_tree().unwrap() };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap().id();

        assert_eq!(
            verify_local(dir.path(), "https://example.com/repo.git", &head.to_string()),
            RepoStatus::Matches,
        );
    }
}
