use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::memory::{MemoryProbe, MemorySample};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BreakerThresholds {
    pub warning_percent: f64,
    pub trip_percent: f64,
    pub sample_interval: Duration,
    /// Entries between reclaim hints; zero disables them.
    pub reclaim_every: usize,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            warning_percent: 70.0,
            trip_percent: 80.0,
            sample_interval: Duration::from_secs(1),
            reclaim_every: 10,
        }
    }
}

impl BreakerThresholds {
    pub fn warning_percent(mut self, percent: f64) -> Self {
        self.warning_percent = percent;
        self
    }

    pub fn trip_percent(mut self, percent: f64) -> Self {
        self.trip_percent = percent;
        self
    }

    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn reclaim_every(mut self, entries: usize) -> Self {
        self.reclaim_every = entries;
        self
    }
}

struct BreakerState {
    probe: Box<dyn MemoryProbe>,
    tripped: bool,
    last_sampled_at: Option<Instant>,
    last_sample: Option<MemorySample>,
}

/// Sticky guard that stops admitting work once memory usage crosses the trip
/// threshold.
///
/// Lifecycle: created once per process and shared by reference; every
/// [`checkpoint`](Self::checkpoint) may mutate it; only
/// [`try_reset`](Self::try_reset) clears a trip, and only while usage is below
/// the warning threshold.
pub struct MemoryCircuitBreaker {
    thresholds: BreakerThresholds,
    state: Mutex<BreakerState>,
}

impl MemoryCircuitBreaker {
    pub fn new(thresholds: BreakerThresholds, probe: impl MemoryProbe + 'static) -> Self {
        Self {
            thresholds,
            state: Mutex::new(BreakerState {
                probe: Box::new(probe),
                tripped: false,
                last_sampled_at: None,
                last_sample: None,
            }),
        }
    }

    pub fn thresholds(&self) -> &BreakerThresholds {
        &self.thresholds
    }

    pub fn is_tripped(&self) -> bool {
        self.lock().tripped
    }

    pub fn last_sample(&self) -> Option<MemorySample> {
        self.lock().last_sample
    }

    /// Returns whether the caller may start its next unit of work.
    ///
    /// Samples at most once per `sample_interval`; in between the cached
    /// state is returned. A failed sample lets work proceed.
    pub fn checkpoint(&self, tag: &str) -> bool {
        let mut state = self.lock();
        if state.tripped {
            return false;
        }
        if let Some(at) = state.last_sampled_at {
            if at.elapsed() < self.thresholds.sample_interval {
                return true;
            }
        }

        let sample = match state.probe.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(checkpoint = tag, error = %e, "memory sample failed");
                return true;
            }
        };
        state.last_sampled_at = Some(Instant::now());
        state.last_sample = Some(sample);

        let usage = sample.usage_percentage;
        if usage >= self.thresholds.trip_percent {
            state.tripped = true;
            error!(
                checkpoint = tag,
                usage_percentage = usage,
                heap_used_bytes = sample.heap_used_bytes,
                heap_total_bytes = sample.heap_total_bytes,
                "memory circuit breaker tripped"
            );
            false
        } else {
            if usage >= self.thresholds.warning_percent {
                warn!(
                    checkpoint = tag,
                    usage_percentage = usage,
                    heap_used_bytes = sample.heap_used_bytes,
                    "memory usage above warning threshold"
                );
            }
            true
        }
    }

    /// Clear a trip if current usage is already below the warning threshold.
    ///
    /// Returns whether the breaker is now closed.
    pub fn try_reset(&self) -> bool {
        let mut state = self.lock();
        if !state.tripped {
            return true;
        }
        let sample = match state.probe.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "memory sample failed, reset refused");
                return false;
            }
        };
        state.last_sampled_at = Some(Instant::now());
        state.last_sample = Some(sample);

        if sample.usage_percentage < self.thresholds.warning_percent {
            state.tripped = false;
            info!(usage_percentage = sample.usage_percentage, "memory circuit breaker reset");
            true
        } else {
            warn!(
                usage_percentage = sample.usage_percentage,
                warning_percent = self.thresholds.warning_percent,
                "memory circuit breaker reset refused"
            );
            false
        }
    }

    /// Hint issued after `entries_done` entries have been handled.
    ///
    /// There is no collector to invoke, so on every `reclaim_every`-th entry the
    /// sampling cache is dropped; the next checkpoint then sees memory freed by
    /// the previous entries instead of a stale reading.
    pub fn hint_reclaim(&self, entries_done: usize) {
        let every = self.thresholds.reclaim_every;
        if every == 0 || entries_done == 0 || entries_done % every != 0 {
            return;
        }
        let mut state = self.lock();
        state.last_sampled_at = None;
        debug!(entries_done, "memory sample cache invalidated");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ManualProbe;
    use crate::Result;

    fn breaker(probe: &ManualProbe) -> MemoryCircuitBreaker {
        let thresholds = BreakerThresholds::default().sample_interval(Duration::ZERO);
        MemoryCircuitBreaker::new(thresholds, probe.clone())
    }

    #[test]
    fn thresholds_default() {
        let thresholds = BreakerThresholds::default();
        assert_eq!(thresholds.warning_percent, 70.0);
        assert_eq!(thresholds.trip_percent, 80.0);
        assert_eq!(thresholds.sample_interval, Duration::from_secs(1));
    }

    #[test]
    fn below_warning_proceeds() {
        let probe = ManualProbe::new(1000);
        probe.set_usage_percent(10.0);
        let breaker = breaker(&probe);
        assert!(breaker.checkpoint("entry"));
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn warning_band_still_proceeds() {
        let probe = ManualProbe::new(1000);
        probe.set_usage_percent(75.0);
        let breaker = breaker(&probe);
        assert!(breaker.checkpoint("entry"));
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn trip_is_sticky_until_reset_below_warning() {
        let probe = ManualProbe::new(1000);
        let breaker = breaker(&probe);

        probe.set_usage_percent(85.0);
        assert!(!breaker.checkpoint("entry"));

        probe.set_usage_percent(10.0);
        for _ in 0..3 {
            assert!(!breaker.checkpoint("entry"));
        }

        assert!(breaker.try_reset());
        assert!(breaker.checkpoint("entry"));
    }

    #[test]
    fn reset_refused_while_above_warning() {
        let probe = ManualProbe::new(1000);
        let breaker = breaker(&probe);

        probe.set_usage_percent(90.0);
        assert!(!breaker.checkpoint("entry"));

        probe.set_usage_percent(72.0);
        assert!(!breaker.try_reset());
        assert!(breaker.is_tripped());
        assert!(!breaker.checkpoint("entry"));
    }

    #[test]
    fn sampling_is_rate_limited() {
        let probe = ManualProbe::new(1000);
        let thresholds = BreakerThresholds::default().sample_interval(Duration::from_secs(3600));
        let breaker = MemoryCircuitBreaker::new(thresholds, probe.clone());

        probe.set_usage_percent(10.0);
        assert!(breaker.checkpoint("first"));

        probe.set_usage_percent(95.0);
        assert!(breaker.checkpoint("cached"));
        assert_eq!(breaker.last_sample().unwrap().heap_used_bytes, 100);
    }

    #[test]
    fn reclaim_hint_forces_resample() {
        let probe = ManualProbe::new(1000);
        let thresholds = BreakerThresholds::default()
            .sample_interval(Duration::from_secs(3600))
            .reclaim_every(2);
        let breaker = MemoryCircuitBreaker::new(thresholds, probe.clone());

        probe.set_usage_percent(10.0);
        assert!(breaker.checkpoint("first"));
        probe.set_usage_percent(95.0);

        breaker.hint_reclaim(1);
        assert!(breaker.checkpoint("not yet"));

        breaker.hint_reclaim(2);
        assert!(!breaker.checkpoint("resampled"));
    }

    struct FailingProbe;

    impl MemoryProbe for FailingProbe {
        fn sample(&mut self) -> Result<MemorySample> {
            Err(crate::Error::NoTotalMemory)
        }
    }

    #[test]
    fn failed_sample_lets_work_proceed() {
        let breaker = MemoryCircuitBreaker::new(BreakerThresholds::default(), FailingProbe);
        assert!(breaker.checkpoint("entry"));
        assert!(breaker.last_sample().is_none());
    }
}
