// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tri-state sampled flag carried by payloads and `tracestate` entries.
//!
//! Inbound values are only trusted when they are exactly `"1"` or `"0"`, or a JSON boolean.
//! Anything else (including `"yes"` / `"no"`) is [`Sampled::Unknown`], which tells the receiver
//! to make its own decision rather than propagate one.

use std::fmt;

use serde_json::Value;

/// Sampling flag as seen on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Sampled {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Sampled {
    /// Parses the `tracestate` form: `"1"` or `"0"`.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("1") => Sampled::Yes,
            Some("0") => Sampled::No,
            _ => Sampled::Unknown,
        }
    }

    /// Parses a JSON value, accepting booleans as well as the string forms.
    #[must_use]
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => Sampled::Yes,
            Some(Value::Bool(false)) => Sampled::No,
            Some(Value::String(s)) => Self::parse(Some(s.as_str())),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(1) => Sampled::Yes,
                Some(0) => Sampled::No,
                _ => Sampled::Unknown,
            },
            _ => Sampled::Unknown,
        }
    }

    /// `Unknown` collapses to `false`.
    #[must_use]
    pub fn boolean_value(self) -> bool {
        self == Sampled::Yes
    }

    #[must_use]
    pub fn is_unknown(self) -> bool {
        self == Sampled::Unknown
    }
}

impl From<bool> for Sampled {
    fn from(sampled: bool) -> Self {
        if sampled {
            Sampled::Yes
        } else {
            Sampled::No
        }
    }
}

/// Writes the `tracestate` form. `Unknown` is written as `0`.
impl fmt::Display for Sampled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.boolean_value() { "1" } else { "0" })
    }
}
