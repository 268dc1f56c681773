//! A [`ProcessProvider`] built on the native Windows suspend/resume-thread
//! primitive, since Windows has no process-wide stop/continue signal.
//!
//! Grounded on the pack's pueue-derived Windows process-group helper:
//! enumerate the process's threads through a `Toolhelp32` snapshot and
//! suspend/resume each of them individually.

use std::fmt::Display;
use std::mem::size_of;
use std::time::{Duration, SystemTime};

use winapi::shared::minwindef::FALSE;
use winapi::shared::ntdef::NULL;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::processthreadsapi::{
    GetProcessTimes, OpenProcess, OpenThread, ResumeThread, SuspendThread, TerminateProcess,
};
use winapi::um::tlhelp32::{
    CreateToolhelp32Snapshot, Process32First, Process32Next, Thread32First, Thread32Next,
    PROCESSENTRY32, TH32CS_SNAPPROCESS, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use winapi::um::winnt::{FILETIME, PROCESS_QUERY_INFORMATION, PROCESS_TERMINATE, THREAD_SUSPEND_RESUME};

use crate::error::{Error, Result};
use crate::provider::{ProcessProvider, SpawnWatch};

/// A pid, standing in for a Windows process handle.
///
/// Like the POSIX provider, every operation reopens whatever `HANDLE` it
/// needs and closes it immediately, so the "handle" here is just the pid.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct WindowsHandle(u32);

impl Display for WindowsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The provider backing Windows targets.
#[derive(Clone, Copy, Default)]
pub struct WindowsProvider;

fn filetime_to_duration_since_epoch(ft: FILETIME) -> Duration {
    // FILETIME counts 100ns intervals since 1601-01-01.
    let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
    Duration::from_nanos(ticks * 100)
}

const EPOCH_DIFFERENCE: Duration = Duration::from_secs(11_644_473_600);

impl ProcessProvider for WindowsProvider {
    type Handle = WindowsHandle;

    fn list_pids(&self) -> Result<Vec<u32>> {
        // SAFETY: `CreateToolhelp32Snapshot`/`Process32First`/`Process32Next`
        // are called with a snapshot handle obtained immediately above and
        // closed before returning, per the Win32 contract.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return Err(Error::Os(std::io::Error::last_os_error()));
            }

            let mut entry = PROCESSENTRY32 {
                dwSize: size_of::<PROCESSENTRY32>() as u32,
                ..std::mem::zeroed()
            };

            let mut pids = Vec::new();
            if Process32First(snapshot, &mut entry) != FALSE {
                loop {
                    pids.push(entry.th32ProcessID);
                    if Process32Next(snapshot, &mut entry) == FALSE {
                        break;
                    }
                }
            }

            CloseHandle(snapshot);
            Ok(pids)
        }
    }

    fn open(&self, pid: u32) -> Result<Self::Handle> {
        // SAFETY: `OpenProcess` is given a valid access mask and pid; the
        // returned handle is closed immediately, we only use it as a
        // liveness probe here.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_INFORMATION, FALSE, pid);
            if handle == NULL as _ {
                return Err(Error::NotFound(pid));
            }
            CloseHandle(handle);
        }
        Ok(WindowsHandle(pid))
    }

    fn pid(&self, handle: &Self::Handle) -> u32 {
        handle.0
    }

    fn name(&self, handle: &Self::Handle) -> Result<String> {
        // SAFETY: snapshot handle is created and closed locally.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return Err(Error::Os(std::io::Error::last_os_error()));
            }

            let mut entry = PROCESSENTRY32 {
                dwSize: size_of::<PROCESSENTRY32>() as u32,
                ..std::mem::zeroed()
            };

            let mut found = None;
            if Process32First(snapshot, &mut entry) != FALSE {
                loop {
                    if entry.th32ProcessID == handle.0 {
                        let name_bytes: Vec<u8> = entry
                            .szExeFile
                            .iter()
                            .take_while(|&&c| c != 0)
                            .map(|&c| c as u8)
                            .collect();
                        found = Some(String::from_utf8_lossy(&name_bytes).into_owned());
                        break;
                    }
                    if Process32Next(snapshot, &mut entry) == FALSE {
                        break;
                    }
                }
            }

            CloseHandle(snapshot);
            found.ok_or(Error::NotFound(handle.0))
        }
    }

    fn cmdline(&self, _handle: &Self::Handle) -> String {
        // Reading another process's command line requires either WMI or
        // reading its PEB through `ReadProcessMemory`; neither is a stable,
        // dependency-light fit here, so this is intentionally best-effort
        // empty, matching the contract's "possibly empty" clause.
        String::new()
    }

    fn create_time(&self, handle: &Self::Handle) -> Result<SystemTime> {
        // SAFETY: handle obtained from `OpenProcess` with a valid pid,
        // closed before returning; `GetProcessTimes` is called on a live
        // handle with valid out-parameters.
        unsafe {
            let process =
                OpenProcess(PROCESS_QUERY_INFORMATION, FALSE, handle.0);
            if process == NULL as _ {
                return Err(Error::NotFound(handle.0));
            }

            let mut creation = std::mem::zeroed();
            let mut exit = std::mem::zeroed();
            let mut kernel = std::mem::zeroed();
            let mut user = std::mem::zeroed();
            let ok = GetProcessTimes(process, &mut creation, &mut exit, &mut kernel, &mut user);
            CloseHandle(process);

            if ok == FALSE {
                return Err(Error::NotFound(handle.0));
            }

            let since_windows_epoch = filetime_to_duration_since_epoch(creation);
            let since_unix_epoch = since_windows_epoch.saturating_sub(EPOCH_DIFFERENCE);
            Ok(SystemTime::UNIX_EPOCH + since_unix_epoch)
        }
    }

    fn cpu_times(&self, handle: &Self::Handle) -> Result<(Duration, Duration)> {
        // SAFETY: same contract as `create_time` above.
        unsafe {
            let process =
                OpenProcess(PROCESS_QUERY_INFORMATION, FALSE, handle.0);
            if process == NULL as _ {
                return Err(Error::NotFound(handle.0));
            }

            let mut creation = std::mem::zeroed();
            let mut exit = std::mem::zeroed();
            let mut kernel = std::mem::zeroed();
            let mut user = std::mem::zeroed();
            let ok = GetProcessTimes(process, &mut creation, &mut exit, &mut kernel, &mut user);
            CloseHandle(process);

            if ok == FALSE {
                return Err(Error::NotFound(handle.0));
            }

            Ok((
                filetime_to_duration_since_epoch(user),
                filetime_to_duration_since_epoch(kernel),
            ))
        }
    }

    fn children(&self, handle: &Self::Handle) -> Vec<Self::Handle> {
        let pids = match self.list_pids() {
            Ok(pids) => pids,
            Err(_) => return Vec::new(),
        };

        // SAFETY: snapshot handle is created and closed locally; entry is a
        // zeroed, correctly-sized `PROCESSENTRY32` as required by the API.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return Vec::new();
            }

            let mut entry = PROCESSENTRY32 {
                dwSize: size_of::<PROCESSENTRY32>() as u32,
                ..std::mem::zeroed()
            };

            let mut children = Vec::new();
            if Process32First(snapshot, &mut entry) != FALSE {
                loop {
                    if entry.th32ParentProcessID == handle.0 && pids.contains(&entry.th32ProcessID)
                    {
                        children.push(WindowsHandle(entry.th32ProcessID));
                    }
                    if Process32Next(snapshot, &mut entry) == FALSE {
                        break;
                    }
                }
            }

            CloseHandle(snapshot);
            children
        }
    }

    fn suspend(&self, handle: &Self::Handle) -> Result<()> {
        for tid in threads_of(handle.0) {
            suspend_thread(tid);
        }
        Ok(())
    }

    fn resume(&self, handle: &Self::Handle) -> Result<()> {
        for tid in threads_of(handle.0) {
            resume_thread(tid);
        }
        Ok(())
    }

    fn kill(&self, handle: &Self::Handle) -> Result<()> {
        // SAFETY: handle obtained from `OpenProcess`, closed after use.
        unsafe {
            let process = OpenProcess(PROCESS_TERMINATE, FALSE, handle.0);
            if process == NULL as _ {
                return Err(Error::NotFound(handle.0));
            }
            let ok = TerminateProcess(process, 1);
            CloseHandle(process);
            if ok == FALSE {
                return Err(Error::PermissionDenied(handle.0));
            }
        }
        Ok(())
    }

    fn spawn_shell(&self, command: &str) -> Result<(Self::Handle, SpawnWatch)> {
        let child = std::process::Command::new("cmd")
            .arg("/C")
            .arg(command)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: command.to_owned(),
                source,
            })?;
        let pid = child.id();
        Ok((WindowsHandle(pid), SpawnWatch::new(child, command.to_owned())))
    }
}

/// Raises the controller's own scheduling priority, per the CLI contract's
/// "process-priority elevation of the controller itself" collaborator.
pub fn raise_own_priority() -> Result<()> {
    use winapi::um::processthreadsapi::{GetCurrentProcess, SetPriorityClass};
    use winapi::um::winbase::HIGH_PRIORITY_CLASS;

    // SAFETY: `GetCurrentProcess` returns a pseudo-handle that never needs
    // closing; `SetPriorityClass` is called with a valid constant.
    let ok = unsafe { SetPriorityClass(GetCurrentProcess(), HIGH_PRIORITY_CLASS) };
    if ok == FALSE {
        return Err(Error::Os(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn threads_of(pid: u32) -> Vec<u32> {
    // SAFETY: snapshot handle is created and closed locally.
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0);
        if snapshot == INVALID_HANDLE_VALUE {
            return Vec::new();
        }

        let mut entry = THREADENTRY32 {
            dwSize: size_of::<THREADENTRY32>() as u32,
            ..std::mem::zeroed()
        };

        let mut threads = Vec::new();
        if Thread32First(snapshot, &mut entry) != FALSE {
            loop {
                if entry.th32OwnerProcessID == pid {
                    threads.push(entry.th32ThreadID);
                }
                if Thread32Next(snapshot, &mut entry) == FALSE {
                    break;
                }
            }
        }

        CloseHandle(snapshot);
        threads
    }
}

fn suspend_thread(tid: u32) {
    // SAFETY: `OpenThread` handle is checked for null and closed below.
    unsafe {
        let thread = OpenThread(THREAD_SUSPEND_RESUME, FALSE, tid);
        if thread != NULL as _ {
            if SuspendThread(thread) == u32::MAX {
                log::warn!(
                    "failed to suspend thread {tid} (error {})",
                    GetLastError()
                );
            }
            CloseHandle(thread);
        }
    }
}

fn resume_thread(tid: u32) {
    // SAFETY: `OpenThread` handle is checked for null and closed below.
    unsafe {
        let thread = OpenThread(THREAD_SUSPEND_RESUME, FALSE, tid);
        if thread != NULL as _ {
            if ResumeThread(thread) == u32::MAX {
                log::warn!("failed to resume thread {tid} (error {})", GetLastError());
            }
            CloseHandle(thread);
        }
    }
}
