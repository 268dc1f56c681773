//! Periodic, human-readable reporting of the control loop's behavior.
//!
//! Kept as per-[`crate::Controller`] instance state (a field, not a
//! module-level global as in the source this was rewritten from) so that
//! more than one limiter can run in a process without their counters
//! colliding - see `DESIGN.md`.

use std::time::Duration;

/// How often (in periods) the averaged telemetry line is logged.
const REPORT_INTERVAL: u64 = 10;
/// How often (in periods) the column header is reprinted.
const HEADER_INTERVAL: u64 = 200;
/// How many periods must elapse before drift is worth flagging - short
/// runs naturally have more jitter as the feedback loop is still settling.
const DRIFT_WARMUP_PERIODS: u64 = 100_000;
/// The drift threshold past which a warning is logged.
const DRIFT_THRESHOLD: Duration = Duration::from_millis(15);

#[derive(Default)]
pub(crate) struct Telemetry {
    count: u64,
    cpu_total: f64,
    work_total: Duration,
    sleep_total: Duration,
}

impl Telemetry {
    /// Records one period's outcome, logging an averaged report every
    /// [`REPORT_INTERVAL`] periods and a header every [`HEADER_INTERVAL`].
    pub fn record(&mut self, p_cpu: f64, t_work: Duration, t_sleep: Duration, working_rate: f64) {
        if self.count % HEADER_INTERVAL == 0 {
            log::debug!(
                "{:>8}  {:>12}  {:>13}  {:>11}",
                "cpu", "work quantum", "sleep quantum", "active rate"
            );
        }

        self.cpu_total += p_cpu;
        self.work_total += t_work;
        self.sleep_total += t_sleep;

        if self.count > 0 && self.count % REPORT_INTERVAL == 0 {
            let n = REPORT_INTERVAL as f64;
            log::debug!(
                "{:>7.2}%  {:>10} ms  {:>11} ms  {:>10.2}%",
                self.cpu_total / n * 100.0,
                (self.work_total / REPORT_INTERVAL as u32).as_millis(),
                (self.sleep_total / REPORT_INTERVAL as u32).as_millis(),
                working_rate * 100.0
            );
            self.cpu_total = 0.0;
            self.work_total = Duration::ZERO;
            self.sleep_total = Duration::ZERO;
        }

        self.count += 1;
    }

    /// Warns once the loop has run long enough to trust the signal, if the
    /// actual work-slice wall time overran the computed sleep budget by
    /// more than [`DRIFT_THRESHOLD`].
    pub fn check_drift(&self, actual_work: Duration, t_sleep: Duration) {
        if self.count <= DRIFT_WARMUP_PERIODS {
            return;
        }
        let drift = actual_work.saturating_sub(t_sleep);
        if drift > DRIFT_THRESHOLD {
            log::warn!(
                "control loop drift: work slice ran {actual_work:?}, exceeding the {t_sleep:?} \
                 sleep budget by {drift:?}"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulators_reset_after_report_interval() {
        let mut telemetry = Telemetry::default();
        for _ in 0..REPORT_INTERVAL {
            telemetry.record(0.5, Duration::from_millis(50), Duration::from_millis(50), 0.5);
        }
        assert_eq!(telemetry.cpu_total, 0.0);
        assert_eq!(telemetry.work_total, Duration::ZERO);
    }

    #[test]
    fn no_drift_warning_before_warmup() {
        let telemetry = Telemetry::default();
        // Count is 0, far below the warmup threshold; this should be a
        // silent no-op regardless of the gap passed in.
        telemetry.check_drift(Duration::from_secs(1), Duration::ZERO);
    }
}
