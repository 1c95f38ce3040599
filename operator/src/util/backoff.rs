//! Pure backoff math, kept free of any `kube`/`tokio` dependency so it can
//! be unit tested directly (mirrors the teacher's `clusters::planner` style).

use std::time::Duration;

/// Kubernetes-style exponential backoff with jitter (spec.md §4.1):
/// `backoff = min(base * 2^(counter-1) * (1 +/- jitter), cap)`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl ExponentialBackoff {
    /// `counter` is the 1-indexed consecutive-failure count. `unit_jitter`
    /// is a caller-supplied sample in `[-1.0, 1.0]` (tests pass fixed
    /// values; production callers pass a `rand`-drawn one) so the function
    /// itself stays deterministic and testable.
    pub fn delay_for(&self, counter: u32, unit_jitter: f64) -> Duration {
        if counter == 0 {
            return Duration::ZERO;
        }
        let exp = 2f64.powi((counter - 1) as i32);
        let nominal = self.base.as_secs_f64() * exp;
        let jittered = nominal * (1.0 + self.jitter * unit_jitter.clamp(-1.0, 1.0));
        Duration::from_secs_f64(jittered.max(0.0)).min(self.cap)
    }

    /// The engine-side entry gate (spec.md §4.1): given how long it's been
    /// since `LastAttemptTime` and the current `ConsecutiveFailures`
    /// counter, returns how much longer the caller must wait, or `None` if
    /// the window has already passed (or there's nothing to back off from).
    pub fn remaining(&self, counter: u32, elapsed: Duration, unit_jitter: f64) -> Option<Duration> {
        if counter == 0 {
            return None;
        }
        self.delay_for(counter, unit_jitter).checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}

/// PVC data-sync retry schedule (spec.md §4.4.5): base 5s, factor 2, jitter
/// 0.1, capped at 5 steps before the sync gives up for this pass.
#[derive(Debug, Clone, Copy)]
pub struct PvcRetrySchedule {
    pub base: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub max_steps: u32,
}

impl Default for PvcRetrySchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 2.0,
            jitter: 0.1,
            max_steps: 5,
        }
    }
}

impl PvcRetrySchedule {
    /// Returns `None` once `step` has exhausted the schedule.
    pub fn delay_for(&self, step: u32, unit_jitter: f64) -> Option<Duration> {
        if step >= self.max_steps {
            return None;
        }
        let nominal = self.base.as_secs_f64() * self.factor.powi(step as i32);
        let jittered = nominal * (1.0 + self.jitter * unit_jitter.clamp(-1.0, 1.0));
        Some(Duration::from_secs_f64(jittered.max(0.0)))
    }
}

/// Geometric backoff for the status-write conflict retry loop (spec.md
/// §4.1): 100ms, x1.5, up to 10 attempts. No jitter -- conflicts are
/// resolved by refetching, not by spacing out independent clients.
pub fn status_conflict_delay(attempt: u32) -> Duration {
    let millis = 100f64 * 1.5f64.powi(attempt as i32);
    Duration::from_millis(millis.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_grows_then_caps() {
        let b = ExponentialBackoff::default();
        assert_eq!(b.delay_for(0, 0.0), Duration::ZERO);
        assert_eq!(b.delay_for(1, 0.0), Duration::from_secs(1));
        assert_eq!(b.delay_for(2, 0.0), Duration::from_secs(2));
        assert_eq!(b.delay_for(3, 0.0), Duration::from_secs(4));
        // 2^10 seconds vastly exceeds the 60s cap.
        assert_eq!(b.delay_for(11, 0.0), Duration::from_secs(60));
    }

    #[test]
    fn exponential_backoff_jitter_stays_within_bounds() {
        let b = ExponentialBackoff::default();
        let low = b.delay_for(2, -1.0);
        let high = b.delay_for(2, 1.0);
        assert!(low < Duration::from_secs(2));
        assert!(high > Duration::from_secs(2));
        assert!(low >= Duration::from_millis(1800));
        assert!(high <= Duration::from_millis(2200));
    }

    #[test]
    fn remaining_is_none_once_window_passes() {
        let b = ExponentialBackoff::default();
        assert_eq!(b.remaining(0, Duration::ZERO, 0.0), None);
        assert_eq!(b.remaining(3, Duration::from_secs(1), 0.0), Some(Duration::from_secs(3)));
        assert_eq!(b.remaining(3, Duration::from_secs(10), 0.0), None);
    }

    #[test]
    fn pvc_retry_schedule_exhausts_after_max_steps() {
        let s = PvcRetrySchedule::default();
        assert!(s.delay_for(0, 0.0).is_some());
        assert!(s.delay_for(4, 0.0).is_some());
        assert!(s.delay_for(5, 0.0).is_none());
    }

    #[test]
    fn pvc_retry_schedule_doubles_each_step() {
        let s = PvcRetrySchedule::default();
        let d0 = s.delay_for(0, 0.0).unwrap();
        let d1 = s.delay_for(1, 0.0).unwrap();
        assert_eq!(d0, Duration::from_secs(5));
        assert_eq!(d1, Duration::from_secs(10));
    }

    #[test]
    fn status_conflict_delay_follows_geometric_schedule() {
        assert_eq!(status_conflict_delay(0), Duration::from_millis(100));
        assert_eq!(status_conflict_delay(1), Duration::from_millis(150));
        assert_eq!(status_conflict_delay(2), Duration::from_millis(225));
    }
}
