// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Target-seeking sampler.
//!
//! Aims for `target` sampled decisions per harvest period without any coordination between
//! processes. Each period runs through three phases:
//! - bootstrap: the first `min(target, 10)` decisions are always sampled
//! - catch-up: while fewer than `target` were sampled, the samples still owed are spread over
//!   the decisions the last period saw but this one has not yet, so steady traffic reaches
//!   `target` (the very first period samples until the target is hit)
//! - backoff: once the target is met, a decision is sampled when a draw from `[0, decided)`
//!   falls below `target^(target / sampled) - sqrt(target)`, which shrinks as more are sampled
//!
//! No period ever samples more than `2 * target`. Counters are atomics; the harvest timer rolls
//! a period over with `swap` while decisions keep flowing.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::{Sampler, SamplerType};

pub const DEFAULT_SAMPLING_TARGET: u32 = 120;
pub const DEFAULT_SAMPLING_PERIOD: Duration = Duration::from_secs(60);

const MAX_BOOTSTRAP_DECISIONS: u64 = 10;

pub struct AdaptiveSampler {
    target: AtomicU32,
    period: Duration,
    decided: AtomicU64,
    sampled: AtomicU64,
    decided_last_period: AtomicU64,
    sampled_last_period: AtomicU64,
    first_period: AtomicBool,
}

impl fmt::Debug for AdaptiveSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveSampler")
            .field("target", &self.target())
            .field("period", &self.period)
            .field("decided", &self.decided.load(Ordering::Relaxed))
            .field("sampled", &self.sampled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for AdaptiveSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLING_TARGET, DEFAULT_SAMPLING_PERIOD)
    }
}

impl AdaptiveSampler {
    #[must_use]
    pub fn new(target: u32, period: Duration) -> Self {
        Self {
            target: AtomicU32::new(target),
            period,
            decided: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
            decided_last_period: AtomicU64::new(0),
            sampled_last_period: AtomicU64::new(0),
            first_period: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn target(&self) -> u32 {
        self.target.load(Ordering::Acquire)
    }

    /// Applies a new target. It takes effect on the next decision.
    pub fn set_target(&self, target: u32) {
        let previous = self.target.swap(target, Ordering::AcqRel);
        if previous != target {
            debug!("Adaptive sampling target changed from {previous} to {target}");
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sampled decisions made in the last completed period.
    #[must_use]
    pub fn sampled_count_last_period(&self) -> u64 {
        self.sampled_last_period.load(Ordering::Acquire)
    }

    /// Decisions made in the last completed period.
    #[must_use]
    pub fn decided_count_last_period(&self) -> u64 {
        self.decided_last_period.load(Ordering::Acquire)
    }

    /// Sampled decisions made so far in the current period.
    #[must_use]
    pub fn sampled_count(&self) -> u64 {
        self.sampled.load(Ordering::Acquire)
    }

    /// Makes one decision and records it against the current period.
    pub fn compute_sampled(&self) -> bool {
        let target = u64::from(self.target());
        let decided = self.decided.fetch_add(1, Ordering::AcqRel) + 1;
        if target == 0 {
            return false;
        }

        let ceiling = target.saturating_mul(2);
        let sampled = self.sampled.load(Ordering::Acquire);
        if sampled >= ceiling {
            return false;
        }

        let wants_sample = if decided <= target.min(MAX_BOOTSTRAP_DECISIONS) {
            true
        } else if self.first_period.load(Ordering::Acquire) {
            sampled < target
        } else if sampled < target {
            // Once past last period's volume every decision is sampled until the target is met
            let decided_last = self.decided_last_period.load(Ordering::Acquire);
            let remaining = decided_last.saturating_sub(decided) + 1;
            rand::thread_rng().gen_range(0..remaining) < target - sampled
        } else {
            let target = target as f64;
            let threshold = target.powf(target / sampled as f64) - target.sqrt();
            (rand::thread_rng().gen_range(0..decided) as f64) < threshold
        };

        wants_sample && self.reserve_sample(target, ceiling)
    }

    /// Counts one sampled decision unless doing so would cross `ceiling`, or, when the sampler
    /// is still in its first period, `target`.
    fn reserve_sample(&self, target: u64, ceiling: u64) -> bool {
        let first_period = self.first_period.load(Ordering::Acquire);
        let limit = if first_period { target } else { ceiling };
        self.sampled
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |sampled| {
                (sampled < limit).then_some(sampled + 1)
            })
            .is_ok()
    }

    /// Rolls the sampler over to a new period.
    pub fn roll_over(&self) {
        let decided = self.decided.swap(0, Ordering::AcqRel);
        let sampled = self.sampled.swap(0, Ordering::AcqRel);
        self.decided_last_period.store(decided, Ordering::Release);
        self.sampled_last_period.store(sampled, Ordering::Release);
        self.first_period.store(false, Ordering::Release);
        debug!(
            "Adaptive sampler period ended: {sampled} sampled of {decided} decided, target {}",
            self.target()
        );
    }
}

impl Sampler for AdaptiveSampler {
    fn sampler_type(&self) -> SamplerType {
        SamplerType::Adaptive
    }

    fn should_sample(&self, _trace_id: &str) -> bool {
        self.compute_sampled()
    }

    fn before_harvest(&self) {
        self.roll_over();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn run(sampler: &AdaptiveSampler, decisions: usize) -> usize {
        (0..decisions).filter(|_| sampler.compute_sampled()).count()
    }

    #[test]
    fn test_bootstrap_samples_first_ten() {
        let sampler = AdaptiveSampler::new(10, Duration::from_secs(5));
        sampler.roll_over();
        for _ in 0..10 {
            assert!(sampler.compute_sampled());
        }
    }

    #[test]
    fn test_bootstrap_is_capped_by_small_target() {
        let sampler = AdaptiveSampler::new(3, Duration::from_secs(5));
        sampler.roll_over();
        assert_eq!(run(&sampler, 3), 3);
    }

    #[test]
    fn test_first_period_samples_target_exactly() {
        let sampler = AdaptiveSampler::new(15, Duration::from_secs(10));
        assert_eq!(run(&sampler, 1_000), 15);
        sampler.roll_over();
        assert_eq!(sampler.sampled_count_last_period(), 15);
        assert_eq!(sampler.decided_count_last_period(), 1_000);
    }

    #[test]
    fn test_target_zero_samples_nothing() {
        let sampler = AdaptiveSampler::new(0, Duration::from_secs(5));
        for _ in 0..12 {
            assert_eq!(run(&sampler, 200), 0);
            sampler.roll_over();
        }
    }

    #[test]
    fn test_steady_state_stays_between_target_and_twice_target() {
        let sampler = AdaptiveSampler::new(10, Duration::from_secs(5));
        run(&sampler, 100);
        sampler.roll_over();
        for _ in 0..50 {
            let sampled = run(&sampler, 100);
            assert!((10..=20).contains(&sampled), "sampled {sampled}");
            sampler.roll_over();
        }
    }

    fn assert_steady_periods(target: u32, decisions: usize) {
        let sampler = AdaptiveSampler::new(target, Duration::from_secs(60));
        run(&sampler, decisions);
        sampler.roll_over();
        let target = target as usize;
        for _ in 0..100 {
            let sampled = run(&sampler, decisions);
            assert!(
                (target..=target * 2).contains(&sampled),
                "sampled {sampled} with target {target}"
            );
            sampler.roll_over();
        }
    }

    #[test]
    fn test_steady_state_reaches_target_of_fifty() {
        assert_steady_periods(50, 100);
        assert_steady_periods(50, 1_000);
    }

    #[test]
    fn test_steady_state_reaches_default_target() {
        assert_steady_periods(DEFAULT_SAMPLING_TARGET, 200);
        assert_steady_periods(DEFAULT_SAMPLING_TARGET, 1_000);
    }

    #[test]
    fn test_intermittent_load_stays_near_target() {
        let target = 50;
        let periods = 10;
        let sampler = AdaptiveSampler::new(target, Duration::from_secs(5));
        let mut total = 0;
        for _ in 0..periods {
            total += run(&sampler, 100);
            sampler.roll_over();
        }
        // two periods without traffic
        sampler.roll_over();
        sampler.roll_over();
        for _ in 0..periods {
            total += run(&sampler, 100);
            sampler.roll_over();
        }

        let expected = target as usize * periods * 2;
        let delta = expected / 20;
        assert!(total.abs_diff(expected) <= delta, "total {total}, expected {expected}");
    }

    #[test]
    fn test_delayed_load_stays_near_target() {
        let target = 50;
        let periods = 10;
        let sampler = AdaptiveSampler::new(target, Duration::from_secs(5));
        sampler.roll_over();
        sampler.roll_over();

        let mut total = 0;
        for _ in 0..periods {
            total += run(&sampler, 100);
            sampler.roll_over();
        }

        let expected = target as usize * periods;
        let delta = expected / 10;
        assert!(total.abs_diff(expected) <= delta, "total {total}, expected {expected}");
    }

    #[test]
    fn test_burst_never_exceeds_ceiling() {
        let sampler = AdaptiveSampler::new(50, Duration::from_secs(5));
        run(&sampler, 10);
        sampler.roll_over();
        // decided_last is tiny, so the catch-up phase samples nearly everything
        let sampled = run(&sampler, 100_000);
        assert!(sampled <= 100, "sampled {sampled}");
        assert!(sampled >= 50, "sampled {sampled}");
    }

    #[test]
    fn test_long_run_average_is_near_target() {
        let target = 10;
        let periods = 30;
        let sampler = AdaptiveSampler::new(target, Duration::from_secs(5));
        let mut total = 0;
        for _ in 0..periods {
            total += run(&sampler, 100);
            sampler.roll_over();
        }
        let expected = (target as usize) * periods;
        assert!(total >= expected, "total {total}");
        assert!(total <= expected * 2, "total {total}");
    }

    #[test]
    fn test_set_target_applies_to_next_decision() {
        let sampler = AdaptiveSampler::new(5, Duration::from_secs(5));
        assert_eq!(run(&sampler, 100), 5);
        sampler.set_target(8);
        assert_eq!(sampler.target(), 8);
        assert_eq!(run(&sampler, 100), 3);
    }

    #[test]
    fn test_concurrent_decisions_respect_ceiling() {
        let sampler = Arc::new(AdaptiveSampler::new(10, Duration::from_secs(5)));
        sampler.roll_over();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sampler = Arc::clone(&sampler);
                thread::spawn(move || run(&sampler, 1_000))
            })
            .collect();
        let sampled: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!((10..=20).contains(&sampled), "sampled {sampled}");
    }

    #[test]
    fn test_sampler_trait() {
        let sampler = AdaptiveSampler::default();
        assert_eq!(sampler.sampler_type(), SamplerType::Adaptive);
        assert_eq!(sampler.target(), DEFAULT_SAMPLING_TARGET);
        assert_eq!(sampler.period(), DEFAULT_SAMPLING_PERIOD);
        assert!(sampler.should_sample("ignored"));
        sampler.before_harvest();
        assert_eq!(sampler.sampled_count_last_period(), 1);
        assert_eq!(sampler.sampled_count(), 0);
    }
}
