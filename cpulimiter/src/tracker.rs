//! Tracks the CPU usage of a process and, optionally, its descendant tree.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime};

use crate::error::{Error, Result};
use crate::provider::ProcessProvider;

/// The smoothing constant for the exponential moving average applied to
/// per-process CPU usage.
const ALPHA: f64 = 0.08;

/// The minimum wall-clock delta between samples before a process's usage is
/// recomputed. Guards against division blowing up on back-to-back
/// refreshes. The original source used a 20ns threshold, which is
/// effectively always exceeded and almost certainly meant 20ms; 1ms is the
/// floor this rewrite uses instead (see `DESIGN.md`).
const MIN_DT: Duration = Duration::from_millis(1);

/// One tracked process.
pub(crate) struct ProcInfo<H> {
    pub handle: H,
    pub pid: u32,
    pub cmdline: String,
    pub start_time: Option<SystemTime>,
    pub cpu_time: Option<Duration>,
    pub cpu_usage: Option<f64>,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
}

/// Maintains the set of pids currently under control, walking the tree from
/// the root pid each period when children are included.
pub(crate) struct ProcessGroupTracker<P: ProcessProvider> {
    provider: P,
    root: u32,
    include_children: bool,
    procs: HashMap<u32, ProcInfo<P::Handle>>,
    last_update: Instant,
}

impl<P: ProcessProvider> ProcessGroupTracker<P> {
    /// Creates a tracker rooted at `root` and performs its first sample.
    pub fn new(provider: P, root: u32, include_children: bool) -> Result<Self> {
        let mut tracker = Self {
            provider,
            root,
            include_children,
            procs: HashMap::new(),
            last_update: Instant::now(),
        };
        tracker.refresh()?;
        Ok(tracker)
    }

    /// Re-samples the whole tree from the root.
    ///
    /// Returns [`Error::NoProcess`] when the root is gone or the tracker
    /// ends the period with nothing left in it.
    pub fn refresh(&mut self) -> Result<()> {
        let root_handle = self
            .provider
            .open(self.root)
            .map_err(|_| Error::NoProcess)?;

        let now = Instant::now();
        let mut seen = HashSet::new();
        self.visit(root_handle, None, true, &mut seen, now)?;

        // Mark-and-sweep: anything not seen this period has exited.
        self.procs.retain(|pid, _| seen.contains(pid));
        self.last_update = now;

        if self.procs.is_empty() {
            return Err(Error::NoProcess);
        }
        Ok(())
    }

    fn visit(
        &mut self,
        handle: P::Handle,
        parent: Option<u32>,
        is_root: bool,
        seen: &mut HashSet<u32>,
        now: Instant,
    ) -> Result<()> {
        let pid = self.provider.pid(&handle);
        if !seen.insert(pid) {
            // Already visited this period (e.g. re-parented mid-scan).
            return Ok(());
        }

        let create_time = self.provider.create_time(&handle);
        let cpu_time = self.provider.cpu_times(&handle);

        let sample = match (create_time, cpu_time) {
            (Ok(created), Ok((user, system))) => Some((created, user + system)),
            _ if is_root => return Err(Error::NoProcess),
            _ => {
                log::debug!("sample failed for pid {pid}, skipping this period");
                None
            }
        };

        if let Some((created, cpu_time)) = sample {
            let reused = self
                .procs
                .get(&pid)
                .and_then(|info| info.start_time)
                .is_some_and(|prev_created| prev_created != created);
            if reused {
                log::debug!("pid {pid} reused by a different process, resetting its history");
                self.procs.remove(&pid);
            }

            match self.procs.get_mut(&pid) {
                Some(info) => {
                    let delta_wall = now.saturating_duration_since(self.last_update);
                    if delta_wall >= MIN_DT {
                        if let Some(prev_cpu_time) = info.cpu_time {
                            let delta_cpu = cpu_time.saturating_sub(prev_cpu_time);
                            let instant_usage =
                                delta_cpu.as_secs_f64() / delta_wall.as_secs_f64();
                            info.cpu_usage = Some(match info.cpu_usage {
                                Some(prior) => (1.0 - ALPHA) * prior + ALPHA * instant_usage,
                                None => instant_usage,
                            });
                        }
                        info.cpu_time = Some(cpu_time);
                    }
                    info.handle = handle.clone();
                    info.parent = parent;
                }
                None => {
                    let info = ProcInfo {
                        handle: handle.clone(),
                        pid,
                        cmdline: self.provider.cmdline(&handle),
                        start_time: Some(created),
                        cpu_time: Some(cpu_time),
                        cpu_usage: None,
                        parent,
                        children: Vec::new(),
                    };
                    log::debug!("tracking pid {} ({})", info.pid, info.cmdline);
                    self.procs.insert(pid, info);
                }
            }
        } else if !self.procs.contains_key(&pid) {
            // Never seen before and unreadable this period: there is
            // nothing to track yet, so don't protect it from the sweep.
            seen.remove(&pid);
            return Ok(());
        }

        if self.include_children {
            let mut child_pids = Vec::new();
            for child in self.provider.children(&handle) {
                let child_pid = self.provider.pid(&child);
                child_pids.push(child_pid);
                self.visit(child, Some(pid), false, seen, now)?;
            }
            if let Some(info) = self.procs.get_mut(&pid) {
                info.children = child_pids;
            }
        }

        Ok(())
    }

    /// Sum of known per-process usage, or `None` if no pid has a known
    /// usage yet (the bootstrap case: every tracked pid has seen only one
    /// sample so far).
    pub fn aggregate_usage(&self) -> Option<f64> {
        let mut sum = 0.0;
        let mut any_known = false;
        for info in self.procs.values() {
            if let Some(usage) = info.cpu_usage {
                sum += usage;
                any_known = true;
            }
        }
        any_known.then_some(sum)
    }

    /// Resumes every tracked pid. Pids the provider can no longer signal
    /// are dropped from the tracker.
    pub fn resume_all(&mut self) {
        self.actuate(|provider, handle| provider.resume(handle));
    }

    /// Suspends every tracked pid. Pids the provider can no longer signal
    /// are dropped from the tracker.
    pub fn suspend_all(&mut self) {
        self.actuate(|provider, handle| provider.suspend(handle));
    }

    fn actuate(&mut self, op: impl Fn(&P, &P::Handle) -> Result<()>) {
        let mut gone = Vec::new();
        for info in self.procs.values() {
            if let Err(err) = op(&self.provider, &info.handle) {
                log::debug!("dropping pid {} from the tracker: {err}", info.pid);
                gone.push(info.pid);
            }
        }
        for pid in gone {
            self.procs.remove(&pid);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.procs.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    #[cfg(test)]
    pub(crate) fn parent_of(&self, pid: u32) -> Option<u32> {
        self.procs.get(&pid).and_then(|info| info.parent)
    }

    #[cfg(test)]
    pub(crate) fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut children = self
            .procs
            .get(&pid)
            .map(|info| info.children.clone())
            .unwrap_or_default();
        children.sort_unstable();
        children
    }
}

#[cfg(test)]
#[cfg(unix)]
mod test {
    use super::*;
    use crate::provider::PosixProvider;
    use std::thread;

    #[test]
    fn root_has_no_parent() {
        let tracker =
            ProcessGroupTracker::new(PosixProvider, std::process::id(), false).unwrap();
        assert_eq!(tracker.parent_of(std::process::id()), None);
    }

    #[test]
    fn walking_a_tree_records_parent_and_children_links() {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();
        let child_pid = child.id();
        // Give the child a moment to show up under the parent in /proc.
        thread::sleep(Duration::from_millis(50));

        let mut tracker =
            ProcessGroupTracker::new(PosixProvider, std::process::id(), true).unwrap();
        tracker.refresh().unwrap();

        assert!(tracker.children_of(std::process::id()).contains(&child_pid));
        assert_eq!(tracker.parent_of(child_pid), Some(std::process::id()));

        let _ = child.kill();
        let _ = child.wait();
    }
}
