//! A [`ProcessProvider`] built on POSIX stop/continue signals and
//! `/proc` introspection.

mod stat;

use std::fmt::Display;
use std::fs;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use lazy_static::lazy_static;

use crate::error::{Error, Result};
use crate::provider::{ProcessProvider, SpawnWatch};

use stat::StatFile;

lazy_static! {
    /// The number of clock ticks per second.
    ///
    /// This is a kernel constant, fixed at compile time on the running
    /// kernel; `sysconf` is the portable way to read it.
    // SAFETY: inherently unsafe as a syscall, but the parameter is valid.
    static ref CLOCK_TICKS: i64 = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };

    /// The system boot time, sampled once.
    ///
    /// `/proc/uptime` is quantized to 10ms and read at a different instant
    /// each call, so recomputing this from `SystemTime::now() - uptime` on
    /// every `create_time` call would make the same process's reconstructed
    /// start time drift from one sample to the next, which is fatal for the
    /// tracker's pid-reuse check (`tracker.rs`). Sampling once and holding it
    /// for the life of the process keeps every derived `create_time` stable.
    static ref BOOT_TIME: SystemTime = stat::boot_time().unwrap_or(SystemTime::UNIX_EPOCH);
}

/// A pid, standing in for a POSIX process handle.
///
/// Every operation below re-reads `/proc/<pid>/...` on demand rather than
/// holding anything open, so a bare pid is all the "handle" needs to be.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PosixHandle(u32);

impl Display for PosixHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The provider backing Linux (and other `/proc`-compatible) targets.
#[derive(Clone, Copy, Default)]
pub struct PosixProvider;

impl PosixProvider {
    fn read_ppid(pid: u32) -> Option<u32> {
        let stat = StatFile::open(pid).ok()?;
        let ppid = stat.iter().nth(3)?;
        u32::from_str(ppid).ok()
    }
}

impl ProcessProvider for PosixProvider {
    type Handle = PosixHandle;

    fn list_pids(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir("/proc")?;
        let mut pids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    fn open(&self, pid: u32) -> Result<Self::Handle> {
        if StatFile::open(pid).is_ok() {
            Ok(PosixHandle(pid))
        } else {
            Err(Error::NotFound(pid))
        }
    }

    fn pid(&self, handle: &Self::Handle) -> u32 {
        handle.0
    }

    fn name(&self, handle: &Self::Handle) -> Result<String> {
        let stat = StatFile::open(handle.0).map_err(|_| Error::NotFound(handle.0))?;
        stat.iter()
            .nth(1)
            .map(ToOwned::to_owned)
            .ok_or(Error::NotFound(handle.0))
    }

    fn cmdline(&self, handle: &Self::Handle) -> String {
        fs::read_to_string(format!("/proc/{}/cmdline", handle.0))
            .map(|raw| {
                raw.split('\0')
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    fn create_time(&self, handle: &Self::Handle) -> Result<SystemTime> {
        let stat = StatFile::open(handle.0).map_err(|_| Error::NotFound(handle.0))?;
        let starttime_ticks: u64 = stat
            .iter()
            .nth(21)
            .and_then(|s| s.parse().ok())
            .ok_or(Error::NotFound(handle.0))?;
        BOOT_TIME
            .checked_add(Duration::from_secs_f64(
                starttime_ticks as f64 / *CLOCK_TICKS as f64,
            ))
            .ok_or(Error::NotFound(handle.0))
    }

    fn cpu_times(&self, handle: &Self::Handle) -> Result<(Duration, Duration)> {
        let stat = StatFile::open(handle.0).map_err(|_| Error::NotFound(handle.0))?;
        let mut fields = stat.iter().skip(13).take(2);
        let utime: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::NotFound(handle.0))?;
        let stime: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::NotFound(handle.0))?;
        let ticks_to_duration = |ticks: u64| Duration::from_secs_f64(ticks as f64 / *CLOCK_TICKS as f64);
        Ok((ticks_to_duration(utime), ticks_to_duration(stime)))
    }

    fn children(&self, handle: &Self::Handle) -> Vec<Self::Handle> {
        let pid = handle.0;
        let Ok(pids) = self.list_pids() else {
            return Vec::new();
        };
        pids.into_iter()
            .filter(|&candidate| candidate != pid)
            .filter(|&candidate| Self::read_ppid(candidate) == Some(pid))
            .map(PosixHandle)
            .collect()
    }

    fn suspend(&self, handle: &Self::Handle) -> Result<()> {
        send_signal(handle.0, libc::SIGSTOP)
    }

    fn resume(&self, handle: &Self::Handle) -> Result<()> {
        send_signal(handle.0, libc::SIGCONT)
    }

    fn kill(&self, handle: &Self::Handle) -> Result<()> {
        send_signal(handle.0, libc::SIGKILL)
    }

    fn spawn_shell(&self, command: &str) -> Result<(Self::Handle, SpawnWatch)> {
        let child = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: command.to_owned(),
                source,
            })?;
        let pid = child.id();
        Ok((PosixHandle(pid), SpawnWatch::new(child, command.to_owned())))
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    // SAFETY: syscall with a valid pid and a valid, fixed signal number.
    let res = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if res == 0 {
        return Ok(());
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Err(Error::NotFound(pid)),
        Some(libc::EPERM) => Err(Error::PermissionDenied(pid)),
        _ => Err(Error::NotFound(pid)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_self() {
        let provider = PosixProvider;
        let pid = std::process::id();
        let handle = provider.open(pid).unwrap();
        assert_eq!(provider.pid(&handle), pid);
    }

    #[test]
    fn open_nonexistent_fails() {
        let provider = PosixProvider;
        // PID 1 exists on any running system but is very unlikely to be us;
        // use an implausibly high pid instead to hit the not-found path.
        assert!(provider.open(u32::MAX - 1).is_err());
    }

    #[test]
    fn create_time_is_stable_across_calls() {
        let provider = PosixProvider;
        let handle = provider.open(std::process::id()).unwrap();
        let first = provider.create_time(&handle).unwrap();
        let second = provider.create_time(&handle).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cpu_times_are_non_negative() {
        let provider = PosixProvider;
        let handle = provider.open(std::process::id()).unwrap();
        let (user, system) = provider.cpu_times(&handle).unwrap();
        assert!(user >= Duration::ZERO);
        assert!(system >= Duration::ZERO);
    }

    #[test]
    fn resume_self_is_a_noop_signal() {
        // Sending SIGCONT to a running process is harmless; this mostly
        // exercises that the syscall plumbing doesn't panic.
        let provider = PosixProvider;
        let handle = provider.open(std::process::id()).unwrap();
        provider.resume(&handle).unwrap();
    }

    #[test]
    fn spawn_and_watch() {
        let provider = PosixProvider;
        let (handle, watch) = provider.spawn_shell("true").unwrap();
        assert!(provider.pid(&handle) > 0);
        watch.watch_in_background();
    }
}
