//  LOCAL.rs
//    by Lut99
//
//  Created:
//    03 Apr 2024, 13:28:45
//  Last edited:
//    11 Dec 2024, 16:02:19
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the local-process execution handler: the command runs as a
//!   child process with its stdout and stderr going to the output file,
//!   and is polled rather than waited on so the interface matches the
//!   scheduler-backed handlers.
//

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use specifications::status::ExecutionStatus;

use crate::errors::ExecuteError as Error;


/***** CONSTANTS *****/
/// How long a cancelled process gets to exit on SIGTERM before SIGKILL.
const CANCEL_GRACE: Duration = Duration::from_secs(5);





/***** LIBRARY *****/
/// A command executing (or to be executed) as a local subprocess.
#[derive(Debug)]
pub struct LocalProcess {
    /// The command line to run.
    pub commands    : String,
    /// The directory the process runs in.
    pub run_path    : PathBuf,
    /// Where the process's stdout and stderr go.
    pub output_file : PathBuf,

    /// The running child, while there is one.
    child      : Option<Child>,
    /// The exit code, once there is one.
    returncode : Option<i32>,
    /// Whether the process was cancelled by us.
    cancelled  : bool,
}

impl LocalProcess {
    /// Creates a handler for the given command line, without starting anything yet.
    pub fn new(commands: impl Into<String>, run_path: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            commands    : commands.into(),
            run_path    : run_path.into(),
            output_file : output_file.into(),
            child       : None,
            returncode  : None,
            cancelled   : false,
        }
    }

    /// Spawns the subprocess and returns, leaving it running in the background.
    ///
    /// # Errors
    /// This function errors if the output file cannot be opened or the
    /// process cannot be spawned.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.child.is_some() || self.returncode.is_some() { return Ok(()); }

        if let Some(parent) = self.output_file.parent() {
            if !parent.exists() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    return Err(Error::OutputDirError{ path: parent.into(), err });
                }
            }
        }
        let handle: File = match File::create(&self.output_file) {
            Ok(handle) => handle,
            Err(err)   => { return Err(Error::OutputOpenError{ path: self.output_file.clone(), err }); },
        };
        let stderr_handle: File = match handle.try_clone() {
            Ok(handle) => handle,
            Err(err)   => { return Err(Error::OutputOpenError{ path: self.output_file.clone(), err }); },
        };

        let mut parts = self.commands.split_whitespace();
        let program: &str = match parts.next() {
            Some(program) => program,
            None          => { return Err(Error::SpawnError{ command: self.commands.clone(), err: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command") }); },
        };
        let mut cmd: Command = Command::new(program);
        cmd.args(parts);
        cmd.current_dir(&self.run_path);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::from(handle));
        cmd.stderr(Stdio::from(stderr_handle));

        debug!("Spawning '{}' in '{}'", self.commands, self.run_path.display());
        match cmd.spawn() {
            Ok(child) => {
                self.child = Some(child);
                Ok(())
            },
            Err(err) => Err(Error::SpawnError{ command: self.commands.clone(), err }),
        }
    }

    /// Polls the subprocess and returns its current status.
    pub fn status(&mut self) -> ExecutionStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(None)         => { return ExecutionStatus::Running; },
                Ok(Some(status)) => {
                    self.returncode = Some(status.code().unwrap_or(-1));
                    self.child = None;
                },
                Err(_) => { return ExecutionStatus::Unknown; },
            }
        }

        if self.cancelled { return ExecutionStatus::Cancelled; }
        match self.returncode {
            None    => ExecutionStatus::Unsubmitted,
            Some(0) => ExecutionStatus::Completed,
            Some(_) => ExecutionStatus::Failed,
        }
    }

    /// Cancels the subprocess if it is running.
    ///
    /// The process first gets a SIGTERM and a grace period to shut down; a
    /// process that is still around after [`CANCEL_GRACE`] gets SIGKILL.
    ///
    /// # Returns
    /// `true` if a process was cancelled, `false` if there was nothing to cancel.
    ///
    /// # Errors
    /// This function errors if signalling or reaping the process fails.
    pub fn cancel(&mut self) -> Result<bool, Error> {
        if let Some(child) = &mut self.child {
            // Ask nicely first
            match signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                Ok(_)                          => {},
                // Already gone; reaping below sorts it out
                Err(nix::errno::Errno::ESRCH)  => {},
                Err(err)                       => { return Err(Error::KillError{ err: std::io::Error::from_raw_os_error(err as i32) }); },
            }

            // Give it the grace period to exit on its own
            let deadline: Instant = Instant::now() + CANCEL_GRACE;
            let mut exited: bool = false;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(_)) => { exited = true; break; },
                    Ok(None)    => std::thread::sleep(Duration::from_millis(100)),
                    Err(err)    => { return Err(Error::PollError{ err }); },
                }
            }

            // Then stop asking
            if !exited {
                debug!("Process '{}' ignored SIGTERM for {}s; killing it", self.commands, CANCEL_GRACE.as_secs());
                if let Err(err) = child.kill() {
                    return Err(Error::KillError{ err });
                }
                let _ = child.wait();
            }

            self.child = None;
            self.cancelled = true;
            info!("Cancelled local process '{}'", self.commands);
            return Ok(true);
        }
        Ok(false)
    }

    /// Blocks until the subprocess exits.
    ///
    /// # Errors
    /// This function errors if there is no process to wait for, or waiting fails.
    pub fn wait(&mut self) -> Result<ExecutionStatus, Error> {
        match &mut self.child {
            Some(child) => match child.wait() {
                Ok(status) => {
                    self.returncode = Some(status.code().unwrap_or(-1));
                    self.child = None;
                    Ok(self.status())
                },
                Err(err) => Err(Error::PollError{ err }),
            },
            None if self.returncode.is_some() => Ok(self.status()),
            None => Err(Error::NotStarted),
        }
    }

    /// Returns the output file of this process.
    #[inline]
    pub fn output_file(&self) -> &Path { &self.output_file }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_process_reports_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = LocalProcess::new("echo hello", dir.path(), dir.path().join("out.txt"));
        assert_eq!(proc.status(), ExecutionStatus::Unsubmitted);

        proc.start().unwrap();
        assert_eq!(proc.wait().unwrap(), ExecutionStatus::Completed);
        assert_eq!(proc.status(), ExecutionStatus::Completed);

        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn failing_process_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = LocalProcess::new("false", dir.path(), dir.path().join("out.txt"));
        proc.start().unwrap();
        assert_eq!(proc.wait().unwrap(), ExecutionStatus::Failed);
    }

    #[test]
    fn cancel_kills_and_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = LocalProcess::new("sleep 30", dir.path(), dir.path().join("out.txt"));
        proc.start().unwrap();
        assert_eq!(proc.status(), ExecutionStatus::Running);

        assert!(proc.cancel().unwrap());
        assert_eq!(proc.status(), ExecutionStatus::Cancelled);

        // Cancelling again is a no-op
        assert!(!proc.cancel().unwrap());
    }

    #[test]
    fn wait_before_start_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = LocalProcess::new("echo hi", dir.path(), dir.path().join("out.txt"));
        assert!(matches!(proc.wait(), Err(Error::NotStarted)));
    }
}
