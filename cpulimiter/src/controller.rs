//! The closed-loop throttling controller: sample, compute the work/sleep
//! split, actuate, repeat.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::attach::{self, Selector};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::provider::ProcessProvider;
use crate::telemetry::Telemetry;
use crate::tracker::ProcessGroupTracker;

/// The control period used when the caller doesn't request a different one.
pub const SLICE_DURATION: Duration = Duration::from_millis(100);

/// How long to wait before retrying attach or a dead target when not
/// running in lazy mode.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Policy knobs for a [`Controller`].
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Desired aggregate CPU budget, in cores-worth units (1.0 == one
    /// full core).
    pub percent: f64,
    /// Control period length. Clamped to at least 1ms.
    pub duration: Duration,
    /// Exit rather than retry on attach failure or target death.
    pub lazy: bool,
    /// Limit the whole descendant tree, not just the named process.
    pub include_children: bool,
}

impl ControllerConfig {
    pub fn new(percent: f64, duration: Duration, lazy: bool, include_children: bool) -> Self {
        let duration = if duration < Duration::from_millis(1) {
            SLICE_DURATION
        } else {
            duration
        };
        Self {
            percent,
            duration,
            lazy,
            include_children,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            percent: 1.5,
            duration: SLICE_DURATION,
            lazy: false,
            include_children: false,
        }
    }
}

/// The outcome of one attach-and-drive cycle.
enum Outcome {
    Cancelled,
    NoProcess,
}

/// Guarantees every tracked pid is resumed when the drive loop returns,
/// including on an early return through `?`.
struct ResumeGuard<P: ProcessProvider> {
    tracker: Arc<RwLock<ProcessGroupTracker<P>>>,
}

impl<P: ProcessProvider> Drop for ResumeGuard<P> {
    fn drop(&mut self) {
        self.tracker.write().resume_all();
    }
}

/// Drives the throttling control loop for a single target (and, if
/// configured, its descendant tree).
pub struct Controller<P: ProcessProvider> {
    provider: P,
    selector: Selector,
    config: ControllerConfig,
    spawned: bool,
    root: Option<u32>,
    tracker: Option<Arc<RwLock<ProcessGroupTracker<P>>>>,
}

impl<P: ProcessProvider> Controller<P> {
    pub fn new(provider: P, selector: Selector, config: ControllerConfig) -> Self {
        Self {
            provider,
            selector,
            config,
            spawned: false,
            root: None,
            tracker: None,
        }
    }

    /// The single entry point. Exactly one `run` per controller instance.
    ///
    /// Loops attach -> drive -> (retry | return) until cancellation or,
    /// under `lazy`, until the first fatal condition.
    pub fn run(mut self, cancel: &CancelToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if let Err(err) = self.attach() {
                log::error!("attach failed: {err}");
                if self.config.lazy {
                    return Err(err);
                }
                thread::sleep(RETRY_BACKOFF);
                continue;
            }

            match self.drive(cancel)? {
                Outcome::Cancelled => return Ok(()),
                Outcome::NoProcess => {
                    log::warn!("no process");
                    if self.config.lazy {
                        return Err(Error::NoProcess);
                    }
                    thread::sleep(RETRY_BACKOFF);
                    continue;
                }
            }
        }
    }

    fn attach(&mut self) -> Result<()> {
        let attached = attach::resolve(&self.provider, &self.selector)?;
        if let Some(watch) = attached.watch {
            watch.watch_in_background();
        }

        self.root = Some(attached.root);
        self.spawned = attached.spawned;

        let tracker = ProcessGroupTracker::new(
            self.provider.clone(),
            attached.root,
            self.config.include_children,
        )?;
        self.tracker = Some(Arc::new(RwLock::new(tracker)));
        Ok(())
    }

    /// Runs one attached session to completion, then unconditionally
    /// applies the exit path (resume everything, kill the target if this
    /// controller is the one that launched it) regardless of how the
    /// session ended.
    fn drive(&mut self, cancel: &CancelToken) -> Result<Outcome> {
        let tracker = self
            .tracker
            .as_ref()
            .expect("attach() populates the tracker before drive() runs")
            .clone();
        let resume_guard = ResumeGuard {
            tracker: tracker.clone(),
        };

        let result = self.run_periods(&tracker, cancel);
        drop(resume_guard);

        if self.spawned {
            if let Some(root) = self.root {
                match self.provider.open(root) {
                    Ok(handle) if self.provider.kill(&handle).is_err() => {
                        log::debug!("target pid {root} could not be killed on exit");
                    }
                    Err(_) => log::debug!("target pid {root} was already gone at kill time"),
                    Ok(_) => {}
                }
            }
        }

        result
    }

    fn run_periods(
        &mut self,
        tracker: &Arc<RwLock<ProcessGroupTracker<P>>>,
        cancel: &CancelToken,
    ) -> Result<Outcome> {
        let mut working_rate: Option<f64> = None;
        let mut telemetry = Telemetry::default();

        loop {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            match tracker.write().refresh() {
                Ok(()) => {}
                Err(Error::NoProcess) => return Ok(Outcome::NoProcess),
                Err(err) => return Err(err),
            }

            let (p_cpu, t_work) = match tracker.read().aggregate_usage() {
                None => {
                    // Bootstrap: no pid has two samples yet.
                    let rate = self.config.percent.min(1.0);
                    working_rate = Some(rate);
                    (self.config.percent, self.config.duration.mul_f64(self.config.percent))
                }
                Some(p_cpu) if p_cpu > 0.0 => {
                    let prior = working_rate.unwrap_or(self.config.percent.min(1.0));
                    let rate = (prior * self.config.percent / p_cpu).clamp(0.0, 1.0);
                    working_rate = Some(rate);
                    (p_cpu, self.config.duration.mul_f64(rate))
                }
                Some(p_cpu) => {
                    // Every tracked pid is known-idle: hold the current
                    // working rate rather than dividing by zero.
                    let rate = working_rate
                        .unwrap_or_else(|| self.config.percent.min(1.0))
                        .clamp(0.0, 1.0);
                    working_rate = Some(rate);
                    (p_cpu, self.config.duration.mul_f64(rate))
                }
            };

            let t_sleep = self.config.duration.saturating_sub(t_work);

            tracker.write().resume_all();
            let work_started = Instant::now();
            thread::sleep(t_work);
            let actual_work = work_started.elapsed();

            if t_sleep > Duration::ZERO {
                tracker.write().suspend_all();
                thread::sleep(t_sleep);
            }

            telemetry.record(p_cpu, t_work, t_sleep, working_rate.unwrap_or(1.0));
            telemetry.check_drift(actual_work, t_sleep);
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod test {
    use super::*;
    use crate::provider::PosixProvider;

    #[test]
    fn cancelled_before_attach_returns_immediately() {
        let selector = Selector::Pid(std::process::id());
        let config = ControllerConfig::default();
        let controller = Controller::new(PosixProvider, selector, config);

        let cancel = CancelToken::new();
        cancel.cancel();

        controller.run(&cancel).unwrap();
    }

    #[test]
    fn nonexistent_pid_fails_fast_when_lazy() {
        let selector = Selector::Pid(u32::MAX - 1);
        let config = ControllerConfig::new(0.5, Duration::from_millis(10), true, false);
        let controller = Controller::new(PosixProvider, selector, config);

        let cancel = CancelToken::new();
        assert!(controller.run(&cancel).is_err());
    }

    #[test]
    fn spawned_command_is_killed_on_cancellation() {
        let selector = Selector::Command("sleep 30".to_owned());
        let config = ControllerConfig::new(1.0, Duration::from_millis(20), false, false);
        let controller = Controller::new(PosixProvider, selector, config);

        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel_clone.cancel();
        });

        controller.run(&cancel).unwrap();
        handle.join().unwrap();
    }
}
