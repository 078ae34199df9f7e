// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration Module
//!
//! Configuration for distributed trace sampling and propagation, parsed from environment
//! variables and YAML files on top of hard-coded defaults.
//!
//! ## Configuration Priority
//!
//! Sources are applied in the following order (later sources override earlier):
//!
//! 1. **Defaults** - Hard-coded defaults in the code
//! 2. **YAML file** - Configuration from `newrelic.yml` (if present)
//! 3. **Environment variables** - `NEW_RELIC_*` environment variables (highest priority)
//!
//! ## Edge Cases and Behaviors
//!
//! - **Identity** (`account_id`, `trusted_account_key`, `primary_application_id`): local
//!   defaults only. A connect handshake replaces them at runtime.
//! - **Numbers as strings**: `"75"` and `75` are both accepted wherever a number is expected.
//! - **Booleans**: anything `serde-aux` understands (`true`, `"1"`, `"false"`, `0`, ...).
//! - **Invalid sampler settings**: fall back to the adaptive sampler with a warning, see
//!   [`sampler`].
//! - **Zero harvest period**: ignored, the 60 second default is kept.

pub mod env;
pub mod log_level;
pub mod sampler;
pub mod yaml;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_aux::prelude::deserialize_bool_from_anything;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{
    env::EnvConfigSource,
    log_level::LogLevel,
    sampler::{SamplerSettings, SamplerTree},
    yaml::YamlConfigSource,
};
use crate::samplers::adaptive::{DEFAULT_SAMPLING_PERIOD, DEFAULT_SAMPLING_TARGET};

pub const CONFIG_FILE_NAME: &str = "newrelic.yml";
pub const DEFAULT_MAX_SAMPLES_STORED: usize = 2000;

/// Helper macro to merge Option<T> fields where T implements Clone
///
/// Providing one field argument will merge the value from the source config field into the config
/// field.
///
/// Providing two field arguments will merge the value from the source config field into the config
/// field if the value is not empty.
#[macro_export]
macro_rules! merge_option {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if $source.$source_field.is_some() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if $source.$field.is_some() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

/// Helper macro to merge Option<T> fields to T fields when Option<T> is Some
///
/// Providing one field argument will merge the value from the source config field into the config
/// field.
///
/// Providing two field arguments will merge the value from the source config field into the config
/// field if the value is not empty.
#[macro_export]
macro_rules! merge_option_to_value {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field = value.clone();
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    ParseError(String),
    UnsupportedField(String),
}

pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn build(&mut self) -> Config {
        let mut failed_sources = 0;
        for source in &self.sources {
            match source.load(&mut self.config) {
                Ok(()) => (),
                Err(e) => {
                    error!("Failed to load config: {:?}", e);
                    failed_sources += 1;
                }
            }
        }

        if !self.sources.is_empty() && failed_sources == self.sources.len() {
            debug!("All sources failed to load config, using default config.");
        }

        if self.config.adaptive_sampling_period.is_zero() {
            warn!(
                "Adaptive sampling period must be greater than zero, using {}s",
                DEFAULT_SAMPLING_PERIOD.as_secs()
            );
            self.config.adaptive_sampling_period = DEFAULT_SAMPLING_PERIOD;
        }

        // The trust key defaults to the account id until a connect handshake says otherwise
        if self.config.trusted_account_key.is_none() {
            self.config
                .trusted_account_key
                .clone_from(&self.config.account_id);
        }

        self.config.clone()
    }
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub log_level: LogLevel,

    pub account_id: Option<String>,
    pub trusted_account_key: Option<String>,
    pub primary_application_id: Option<String>,

    pub span_events_enabled: bool,
    pub span_events_max_samples_stored: usize,
    pub transaction_events_enabled: bool,
    pub transaction_events_max_samples_stored: usize,

    pub include_newrelic_header: bool,

    pub adaptive_sampling_target: u32,
    pub adaptive_sampling_period: Duration,
    pub sampler: SamplerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            account_id: None,
            trusted_account_key: None,
            primary_application_id: None,
            span_events_enabled: true,
            span_events_max_samples_stored: DEFAULT_MAX_SAMPLES_STORED,
            transaction_events_enabled: true,
            transaction_events_max_samples_stored: DEFAULT_MAX_SAMPLES_STORED,
            include_newrelic_header: true,
            adaptive_sampling_target: DEFAULT_SAMPLING_TARGET,
            adaptive_sampling_period: DEFAULT_SAMPLING_PERIOD,
            sampler: SamplerSettings::default(),
        }
    }
}

impl Config {
    /// Sampler tree with defaults, overrides and ratio layering applied.
    #[must_use]
    pub fn sampler_tree(&self) -> SamplerTree {
        self.sampler.resolve()
    }
}

/// Loads configuration in priority order:
/// 1. Defaults
/// 2. YAML file (`newrelic.yml` in `config_directory`)
/// 3. Environment variables (highest priority)
#[must_use]
pub fn get_config(config_directory: &Path) -> Config {
    let path = config_directory.join(CONFIG_FILE_NAME);
    ConfigBuilder::default()
        .add_source(Box::new(YamlConfigSource { path }))
        .add_source(Box::new(EnvConfigSource))
        .build()
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => {
            error!(
                "Failed to parse value, expected a string, got: {}, ignoring",
                other
            );
            Ok(None)
        }
    }
}

/// Account ids and application ids are numbers in YAML but strings on the wire.
pub fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.to_string()))
            }
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => {
            error!("Failed to parse value, expected a string or an integer, ignoring");
            Ok(None)
        }
    }
}

pub fn deserialize_optional_bool_from_anything<'de, D>(
    deserializer: D,
) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    // First try to deserialize as Option<_> to handle null/missing values
    let opt: Option<Value> = Option::deserialize(deserializer)?;

    match opt {
        None => Ok(None),
        Some(value) => match deserialize_bool_from_anything(value) {
            Ok(bool_result) => Ok(Some(bool_result)),
            Err(e) => {
                error!("Failed to parse bool value: {}, ignoring", e);
                Ok(None)
            }
        },
    }
}

/// Accepts a number or a numeric string. Anything else is logged and ignored.
pub fn deserialize_optional_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let text = match Option::<Value>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            error!("Failed to parse value, expected a number, got: {other}, ignoring");
            return Ok(None);
        }
    };
    match text.parse::<T>() {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            error!("Failed to parse number '{text}': {e}, ignoring");
            Ok(None)
        }
    }
}

pub fn deserialize_option_lossless<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to deserialize optional value: {}, ignoring", e);
            Ok(None)
        }
    }
}

pub fn deserialize_optional_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let seconds: Option<f64> = deserialize_optional_number(deserializer)?;
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
        Some(s) => {
            error!("Failed to parse duration: {s} is not a non-negative number of seconds, ignoring");
            Ok(None)
        }
        None => Ok(None),
    }
}
