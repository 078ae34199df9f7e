// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Priority float encoding.
//!
//! A priority packs two things into one float:
//! - a random base in `[0, 1)` used to order events under reservoir pressure
//! - a granularity increment: `+1.0` when sampled at partial granularity, `+2.0` when sampled
//!   at full granularity
//!
//! Any value `>= 1.0` is therefore "sampled" and any value `>= 2.0` is "full granularity".
//! All arithmetic on the encoding stays in this module; callers ask [`is_sampled`] and
//! [`is_full_granularity`] rather than comparing floats themselves.
//!
//! Values are kept to six fraction digits so that a priority serialized onto the wire and
//! parsed back re-serializes to the same text.

use rand::Rng;

/// Lowest priority that counts as sampled.
pub const SAMPLED_THRESHOLD: f32 = 1.0;

/// Lowest priority that counts as sampled at full granularity.
pub const FULL_GRANULARITY_THRESHOLD: f32 = 2.0;

const FRACTION_SCALE: f64 = 1_000_000.0;

/// Recording granularity a sampled trace is kept at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// A reduced set of spans and attributes.
    Partial,
    /// All spans and attributes.
    Full,
}

impl Granularity {
    #[must_use]
    pub fn increment(self) -> f32 {
        match self {
            Granularity::Partial => SAMPLED_THRESHOLD,
            Granularity::Full => FULL_GRANULARITY_THRESHOLD,
        }
    }
}

/// Draws a fresh base priority in `[0, 1)`, truncated to six fraction digits.
#[must_use]
pub fn next_base() -> f32 {
    truncate(rand::thread_rng().gen::<f32>())
}

/// Truncates a base priority to six fraction digits. Non-finite input becomes `0.0`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn truncate(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    ((f64::from(value) * FRACTION_SCALE).floor() / FRACTION_SCALE) as f32
}

/// Applies the increment for `granularity` to a base priority.
///
/// `None` leaves the base untouched (not sampled).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode(base: f32, granularity: Option<Granularity>) -> f32 {
    let base = truncate(base).clamp(0.0, 0.999_999);
    let Some(granularity) = granularity else {
        return base;
    };
    let value = f64::from(base) + f64::from(granularity.increment());
    ((value * FRACTION_SCALE).round() / FRACTION_SCALE) as f32
}

/// Priority `>= 1.0`.
#[must_use]
pub fn is_sampled(priority: f32) -> bool {
    priority >= SAMPLED_THRESHOLD
}

/// Priority `>= 2.0`.
#[must_use]
pub fn is_full_granularity(priority: f32) -> bool {
    priority >= FULL_GRANULARITY_THRESHOLD
}

/// Granularity a priority was sampled at, if any.
#[must_use]
pub fn granularity(priority: f32) -> Option<Granularity> {
    if is_full_granularity(priority) {
        Some(Granularity::Full)
    } else if is_sampled(priority) {
        Some(Granularity::Partial)
    } else {
        None
    }
}

/// Formats a priority with at most six fraction digits and no trailing zeros.
///
/// `0.5` is written `0.5`, `2.0` is written `2`.
#[must_use]
pub fn format(priority: f32) -> String {
    let text = format!("{priority:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Parses a wire priority. Empty, non-numeric, and non-finite input yield `None`.
#[must_use]
pub fn parse(value: &str) -> Option<f32> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<f32>().ok().filter(|p| p.is_finite())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_next_base_in_range() {
        for _ in 0..10_000 {
            let base = next_base();
            assert!((0.0..1.0).contains(&base), "{base}");
            assert!(!is_sampled(base));
        }
    }

    #[test]
    fn test_truncate() {
        assert!((truncate(0.123_456_78) - 0.123_456).abs() < 1e-7);
        assert_eq!(truncate(f32::NAN), 0.0);
        assert!(truncate(0.999_999_9) < 1.0);
    }

    #[test]
    fn test_encode_increments() {
        assert!((encode(0.25, None) - 0.25).abs() < 1e-7);
        assert!((encode(0.25, Some(Granularity::Partial)) - 1.25).abs() < 1e-6);
        assert!((encode(0.25, Some(Granularity::Full)) - 2.25).abs() < 1e-6);
        assert_eq!(granularity(encode(0.7, Some(Granularity::Partial))), Some(Granularity::Partial));
        assert_eq!(granularity(encode(0.7, Some(Granularity::Full))), Some(Granularity::Full));
        assert_eq!(granularity(encode(0.7, None)), None);
    }

    #[test]
    fn test_format_trims() {
        assert_eq!(format(0.5), "0.5");
        assert_eq!(format(2.0), "2");
        assert_eq!(format(0.0), "0");
        assert_eq!(format(1.123_456), "1.123456");
    }

    #[test]
    fn test_format_is_stable_through_parse() {
        for _ in 0..1_000 {
            let priority = encode(next_base(), Some(Granularity::Full));
            let text = format(priority);
            assert_eq!(format(parse(&text).unwrap()), text);
        }
    }

    #[test]
    fn test_parse() {
        assert!((parse(".123").unwrap() - 0.123).abs() < 1e-7);
        assert!((parse("1.5").unwrap() - 1.5).abs() < 1e-7);
        assert_eq!(parse(""), None);
        assert_eq!(parse("abc"), None);
        assert_eq!(parse("NaN"), None);
    }
}
