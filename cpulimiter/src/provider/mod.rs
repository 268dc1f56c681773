//! The process provider contract: the OS abstraction the tracker and
//! controller are built against.
//!
//! Everything OS-specific lives behind this trait so the rest of the crate
//! never touches `/proc` or a Win32 handle directly.

use std::time::{Duration, SystemTime};

use crate::error::Result;

#[cfg(unix)]
pub mod posix;
#[cfg(unix)]
pub use posix::PosixProvider;

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
pub use windows::WindowsProvider;

/// Watches a spawned command for its eventual exit without blocking the
/// caller. Logged, not propagated: a spawned target dying is not itself a
/// controller error (the tracker will notice on its next refresh).
pub struct SpawnWatch {
    child: std::process::Child,
    command: String,
}

impl SpawnWatch {
    pub(crate) fn new(child: std::process::Child, command: String) -> Self {
        Self { child, command }
    }

    /// Moves the wait onto a background thread and logs the exit status.
    pub fn watch_in_background(mut self) {
        let result = std::thread::Builder::new()
            .name("cpulimit-spawn-watch".into())
            .spawn(move || match self.child.wait() {
                Ok(status) => log::warn!("process '{}' exited with {status}", self.command),
                Err(err) => log::warn!("failed to wait for process '{}': {err}", self.command),
            });
        if let Err(err) = result {
            log::debug!("could not spawn the exit-watch thread: {err}");
        }
    }
}

/// Abstracts the host OS's process introspection and actuation primitives.
///
/// Implementations are expected to be cheap to clone (a unit struct, or at
/// most a handful of cached constants) since the controller clones its
/// provider into the tracker it owns.
pub trait ProcessProvider: Clone {
    /// A lightweight reference to a process. Implementations are free to
    /// make this nothing more than the pid: every operation below is
    /// expected to re-resolve whatever OS resource it needs rather than
    /// hold it open across calls.
    type Handle: Clone;

    /// Enumerates all pids currently visible to the provider.
    fn list_pids(&self) -> Result<Vec<u32>>;

    /// Resolves a pid to a handle, failing if the process does not exist.
    fn open(&self, pid: u32) -> Result<Self::Handle>;

    /// The pid backing a handle.
    fn pid(&self, handle: &Self::Handle) -> u32;

    /// The process's executable name (exact, not a path), used for
    /// name-based selection.
    fn name(&self, handle: &Self::Handle) -> Result<String>;

    /// Best-effort command line. Empty string on failure: this is never
    /// fatal, only diagnostic.
    fn cmdline(&self, handle: &Self::Handle) -> String;

    /// Wall-clock process creation time, used to detect pid reuse across
    /// samples.
    fn create_time(&self, handle: &Self::Handle) -> Result<SystemTime>;

    /// Cumulative (user, system) CPU time consumed by the process so far.
    fn cpu_times(&self, handle: &Self::Handle) -> Result<(Duration, Duration)>;

    /// Immediate children. A failure here is non-fatal and yields an empty
    /// list - a process with no readable children is indistinguishable
    /// from a childless one as far as the tracker is concerned.
    fn children(&self, handle: &Self::Handle) -> Vec<Self::Handle>;

    /// Stops all threads of the process (`SIGSTOP` on POSIX, suspend-all-
    /// threads on Windows).
    fn suspend(&self, handle: &Self::Handle) -> Result<()>;

    /// Resumes all threads of the process (`SIGCONT` on POSIX, resume-all-
    /// threads on Windows).
    fn resume(&self, handle: &Self::Handle) -> Result<()>;

    /// Terminates the process (`SIGKILL` on POSIX, `TerminateProcess` on
    /// Windows). Best effort: errors are not actionable by the caller.
    fn kill(&self, handle: &Self::Handle) -> Result<()>;

    /// Launches `command` through the platform shell and returns a handle
    /// to the new process plus a watcher for its eventual exit.
    fn spawn_shell(&self, command: &str) -> Result<(Self::Handle, SpawnWatch)>;
}
