// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;

use super::{Sampler, SamplerType};

/// Knuth's multiplicative hash factor, shared with other tracers so that the same trace id
/// yields the same decision everywhere.
pub const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

const MIN_RATIO: f64 = 0.0;
const MAX_RATIO: f64 = 1.0;

/// Keeps `ratio` of all traces, decided purely from the trace id.
#[derive(Clone, Copy, PartialEq)]
pub struct TraceIdRatioBasedSampler {
    ratio: f64,
    threshold: u64,
}

impl fmt::Debug for TraceIdRatioBasedSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceIdRatioBasedSampler")
            .field("ratio", &self.ratio)
            .finish()
    }
}

impl TraceIdRatioBasedSampler {
    /// `ratio` is clamped to `[0.0, 1.0]`. NaN samples nothing.
    #[must_use]
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() {
            MIN_RATIO
        } else {
            ratio.clamp(MIN_RATIO, MAX_RATIO)
        };
        Self {
            ratio,
            threshold: Self::calculate_threshold(ratio),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_threshold(ratio: f64) -> u64 {
        if ratio >= MAX_RATIO {
            u64::MAX
        } else {
            (ratio * (u64::MAX as f64)) as u64
        }
    }

    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Whether `ratio` is usable as configured, rather than after clamping.
    #[must_use]
    pub fn is_valid_ratio(ratio: f64) -> bool {
        (MIN_RATIO..=MAX_RATIO).contains(&ratio)
    }
}

/// Lower 64 bits of a hex trace id. Ids that are not hex are hashed instead so they still get a
/// stable decision.
fn trace_id_to_u64(trace_id: &str) -> u64 {
    let start = trace_id.len().saturating_sub(16);
    trace_id
        .get(start..)
        .filter(|tail| !tail.is_empty())
        .and_then(|tail| u64::from_str_radix(tail, 16).ok())
        .unwrap_or_else(|| fnv1a_64(trace_id.as_bytes()))
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

impl Sampler for TraceIdRatioBasedSampler {
    fn sampler_type(&self) -> SamplerType {
        SamplerType::TraceIdRatioBased
    }

    fn should_sample(&self, trace_id: &str) -> bool {
        if self.ratio <= MIN_RATIO {
            return false;
        }
        if self.ratio >= MAX_RATIO {
            return true;
        }
        let hashed_id = trace_id_to_u64(trace_id).wrapping_mul(KNUTH_FACTOR);
        hashed_id < self.threshold
    }
}
