// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampler configuration tree.
//!
//! A sampler slot (`root`, `remote_parent_sampled`, `remote_parent_not_sampled`) accepts either
//! a bare type name or a single-key map carrying sub-options:
//!
//! ```yaml
//! distributed_tracing:
//!   sampler:
//!     adaptive_sampling_target: 10
//!     root:
//!       trace_id_ratio_based:
//!         ratio: 0.1
//!     remote_parent_sampled: always_on
//!     remote_parent_not_sampled:
//!       adaptive:
//!         sampling_target: 15
//!     full_granularity:
//!       enabled: true
//!     partial_granularity:
//!       enabled: true
//!       type: reduced
//!       root: always_off
//! ```
//!
//! Configuration mistakes never fail loading: they fall back to the default sampler with a
//! warning.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::samplers::{adaptive::DEFAULT_SAMPLING_TARGET, SamplerType, TraceIdRatioBasedSampler};

pub const DEFAULT: &str = "default";
pub const ADAPTIVE: &str = "adaptive";
pub const ALWAYS_ON: &str = "always_on";
pub const ALWAYS_OFF: &str = "always_off";
pub const TRACE_ID_RATIO_BASED: &str = "trace_id_ratio_based";

pub const RATIO: &str = "ratio";
pub const SAMPLING_TARGET: &str = "sampling_target";

/// One configured sampler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplerConfig {
    /// `sampling_target: None` selects the shared adaptive instance.
    Adaptive { sampling_target: Option<u32> },
    AlwaysOn,
    AlwaysOff,
    TraceIdRatioBased { ratio: f64 },
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::Adaptive {
            sampling_target: None,
        }
    }
}

impl SamplerConfig {
    #[must_use]
    pub fn sampler_type(&self) -> SamplerType {
        match self {
            SamplerConfig::Adaptive { .. } => SamplerType::Adaptive,
            SamplerConfig::AlwaysOn => SamplerType::AlwaysOn,
            SamplerConfig::AlwaysOff => SamplerType::AlwaysOff,
            SamplerConfig::TraceIdRatioBased { .. } => SamplerType::TraceIdRatioBased,
        }
    }

    #[must_use]
    pub fn ratio(&self) -> Option<f64> {
        match self {
            SamplerConfig::TraceIdRatioBased { ratio } => Some(*ratio),
            _ => None,
        }
    }

    #[must_use]
    pub fn sampling_target(&self) -> Option<u32> {
        match self {
            SamplerConfig::Adaptive { sampling_target } => *sampling_target,
            _ => None,
        }
    }

    /// Parses one slot. `slot` only names the slot in warnings.
    #[must_use]
    pub fn from_value(slot: &str, value: &Value) -> Self {
        match value {
            Value::String(name) => Self::from_type(slot, name.trim(), &Value::Null),
            Value::Object(map) if map.len() == 1 => match map.iter().next() {
                Some((name, options)) => Self::from_type(slot, name.trim(), options),
                None => Self::invalid_type(slot),
            },
            _ => Self::invalid_type(slot),
        }
    }

    fn from_type(slot: &str, name: &str, options: &Value) -> Self {
        match name {
            DEFAULT | ADAPTIVE => SamplerConfig::Adaptive {
                sampling_target: parse_sampling_target(slot, options),
            },
            ALWAYS_ON => SamplerConfig::AlwaysOn,
            ALWAYS_OFF => SamplerConfig::AlwaysOff,
            TRACE_ID_RATIO_BASED => match parse_ratio(options) {
                Ok(ratio) => SamplerConfig::TraceIdRatioBased { ratio },
                Err(raw) => {
                    warn!(
                        "The {slot} sampler was configured to use the {TRACE_ID_RATIO_BASED} sampler type with an invalid ratio: {raw}. Configuring it to use the default {ADAPTIVE} sampler type."
                    );
                    SamplerConfig::default()
                }
            },
            _ => Self::invalid_type(slot),
        }
    }

    fn invalid_type(slot: &str) -> Self {
        warn!(
            "The {slot} sampler was configured with an invalid sampler type. Configuring it to use the default {ADAPTIVE} sampler type."
        );
        SamplerConfig::default()
    }
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_ratio(options: &Value) -> Result<f64, String> {
    let Some(raw) = options.get(RATIO) else {
        return Err("ratio not set".to_string());
    };
    match number_from(raw) {
        Some(ratio) if TraceIdRatioBasedSampler::is_valid_ratio(ratio) => Ok(ratio),
        _ => Err(raw.to_string()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_sampling_target(slot: &str, options: &Value) -> Option<u32> {
    let Some(raw) = options.get(SAMPLING_TARGET) else {
        debug!(
            "Sampler {slot} was not configured with a {SAMPLING_TARGET}. Sampler will use the shared adaptive sampler instance."
        );
        return None;
    };
    match number_from(raw) {
        Some(target) if (0.0..=f64::from(u32::MAX)).contains(&target) => Some(target as u32),
        _ => {
            warn!(
                "The {slot} sampler was configured to use the {ADAPTIVE} sampler type with an invalid sampling target: {raw}. Configuring it to use the default sampling target {DEFAULT_SAMPLING_TARGET}"
            );
            Some(DEFAULT_SAMPLING_TARGET)
        }
    }
}

/// Kind of reduced recording applied to partially sampled traces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PartialType {
    #[default]
    Essential,
    Reduced,
    Compact,
}

impl AsRef<str> for PartialType {
    fn as_ref(&self) -> &str {
        match self {
            PartialType::Essential => "essential",
            PartialType::Reduced => "reduced",
            PartialType::Compact => "compact",
        }
    }
}

impl fmt::Display for PartialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for PartialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "essential" => Ok(PartialType::Essential),
            "reduced" => Ok(PartialType::Reduced),
            "compact" => Ok(PartialType::Compact),
            _ => Err(format!(
                "Invalid partial granularity type: '{s}'. Valid types are: essential, reduced, compact"
            )),
        }
    }
}

impl PartialType {
    /// Parses a configured type, warning and falling back to `Essential` when invalid.
    #[must_use]
    pub fn parse_or_default(value: &str) -> Self {
        PartialType::from_str(value).unwrap_or_else(|e| {
            warn!("{e}");
            PartialType::default()
        })
    }
}

/// One sampler per case.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplerSlots {
    pub root: SamplerConfig,
    pub remote_parent_sampled: SamplerConfig,
    pub remote_parent_not_sampled: SamplerConfig,
}

/// Sparse slot settings from one configuration source. `None` means "not specified".
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SlotSettings {
    pub root: Option<SamplerConfig>,
    pub remote_parent_sampled: Option<SamplerConfig>,
    pub remote_parent_not_sampled: Option<SamplerConfig>,
}

impl SlotSettings {
    /// Parses raw slot values as they come out of a source.
    #[must_use]
    pub fn from_values(
        prefix: &str,
        root: Option<&Value>,
        remote_parent_sampled: Option<&Value>,
        remote_parent_not_sampled: Option<&Value>,
    ) -> Self {
        let parse = |slot: &str, value: Option<&Value>| {
            value.map(|v| SamplerConfig::from_value(&format!("{prefix}{slot}"), v))
        };
        Self {
            root: parse("root", root),
            remote_parent_sampled: parse("remote_parent_sampled", remote_parent_sampled),
            remote_parent_not_sampled: parse(
                "remote_parent_not_sampled",
                remote_parent_not_sampled,
            ),
        }
    }

    /// Overlays every slot `other` specifies.
    pub fn merge(&mut self, other: &SlotSettings) {
        if other.root.is_some() {
            self.root.clone_from(&other.root);
        }
        if other.remote_parent_sampled.is_some() {
            self.remote_parent_sampled
                .clone_from(&other.remote_parent_sampled);
        }
        if other.remote_parent_not_sampled.is_some() {
            self.remote_parent_not_sampled
                .clone_from(&other.remote_parent_not_sampled);
        }
    }

    /// Fills each unspecified slot from `fallback`, then from the default sampler.
    #[must_use]
    pub fn resolve(&self, fallback: &SlotSettings) -> SamplerSlots {
        let pick = |own: &Option<SamplerConfig>, fallback: &Option<SamplerConfig>| {
            own.clone()
                .or_else(|| fallback.clone())
                .unwrap_or_default()
        };
        SamplerSlots {
            root: pick(&self.root, &fallback.root),
            remote_parent_sampled: pick(
                &self.remote_parent_sampled,
                &fallback.remote_parent_sampled,
            ),
            remote_parent_not_sampled: pick(
                &self.remote_parent_not_sampled,
                &fallback.remote_parent_not_sampled,
            ),
        }
    }
}

/// Everything the sources say about samplers, before defaults are applied.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplerSettings {
    /// Slots directly under `sampler`.
    pub base: SlotSettings,
    pub full_granularity_enabled: Option<bool>,
    pub full_granularity: SlotSettings,
    pub partial_granularity_enabled: Option<bool>,
    pub partial_granularity_type: Option<PartialType>,
    pub partial_granularity: SlotSettings,
}

impl SamplerSettings {
    pub fn merge(&mut self, other: &SamplerSettings) {
        self.base.merge(&other.base);
        self.full_granularity.merge(&other.full_granularity);
        self.partial_granularity.merge(&other.partial_granularity);
        if other.full_granularity_enabled.is_some() {
            self.full_granularity_enabled = other.full_granularity_enabled;
        }
        if other.partial_granularity_enabled.is_some() {
            self.partial_granularity_enabled = other.partial_granularity_enabled;
        }
        if other.partial_granularity_type.is_some() {
            self.partial_granularity_type = other.partial_granularity_type;
        }
    }

    /// Applies defaults, `full_granularity` overrides and ratio layering.
    #[must_use]
    pub fn resolve(&self) -> SamplerTree {
        let full_enabled = self.full_granularity_enabled.unwrap_or(true);
        let full = self.full_granularity.resolve(&self.base);
        let mut partial = self.partial_granularity.resolve(&SlotSettings::default());

        if full_enabled {
            layer_ratio(&full.root, &mut partial.root);
            layer_ratio(&full.remote_parent_sampled, &mut partial.remote_parent_sampled);
            layer_ratio(
                &full.remote_parent_not_sampled,
                &mut partial.remote_parent_not_sampled,
            );
        }

        SamplerTree {
            full_granularity: GranularityConfig {
                enabled: full_enabled,
                samplers: full,
            },
            partial_granularity: GranularityConfig {
                enabled: self.partial_granularity_enabled.unwrap_or(false),
                samplers: partial,
            },
            partial_type: self.partial_granularity_type.unwrap_or_default(),
        }
    }
}

/// Partial sampling only sees traces full sampling rejected, so a partial ratio stacks on top
/// of the full ratio for the same trace id hash.
fn layer_ratio(full: &SamplerConfig, partial: &mut SamplerConfig) {
    if let (
        SamplerConfig::TraceIdRatioBased { ratio: full_ratio },
        SamplerConfig::TraceIdRatioBased { ratio },
    ) = (full, &mut *partial)
    {
        *ratio = (*ratio + full_ratio).min(1.0);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GranularityConfig {
    pub enabled: bool,
    pub samplers: SamplerSlots,
}

/// Resolved sampler configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerTree {
    pub full_granularity: GranularityConfig,
    pub partial_granularity: GranularityConfig,
    pub partial_type: PartialType,
}

impl Default for SamplerTree {
    fn default() -> Self {
        SamplerSettings::default().resolve()
    }
}
