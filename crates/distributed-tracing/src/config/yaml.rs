// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `newrelic.yml` configuration file.
//!
//! ```yaml
//! log_level: debug
//! account_id: 33
//! primary_application_id: 2827902
//! span_events:
//!   enabled: true
//!   max_samples_stored: 2000
//! transaction_events:
//!   max_samples_stored: 1000
//! distributed_tracing:
//!   exclude_newrelic_header: false
//!   sampler:
//!     adaptive_sampling_target: 10
//!     root: always_on
//! ```
//!
//! The sampler slots are kept as raw values here and parsed by
//! [`SlotSettings::from_values`](crate::config::sampler::SlotSettings::from_values), which
//! owns the fallback rules.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::{
        deserialize_option_lossless, deserialize_optional_bool_from_anything,
        deserialize_optional_duration_from_seconds, deserialize_optional_number,
        deserialize_optional_string, deserialize_string_or_int,
        log_level::LogLevel,
        sampler::{PartialType, SamplerSettings, SlotSettings},
        Config, ConfigError, ConfigSource,
    },
    merge_option, merge_option_to_value,
};

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfig {
    pub log_level: Option<LogLevel>,

    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub account_id: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub trusted_account_key: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub primary_application_id: Option<String>,

    pub span_events: EventsConfig,
    pub transaction_events: EventsConfig,
    pub distributed_tracing: DistributedTracingConfig,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct EventsConfig {
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_number")]
    pub max_samples_stored: Option<usize>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DistributedTracingConfig {
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub exclude_newrelic_header: Option<bool>,
    pub sampler: YamlSamplerConfig,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct YamlSlots {
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub root: Option<Value>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub remote_parent_sampled: Option<Value>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub remote_parent_not_sampled: Option<Value>,
}

impl YamlSlots {
    fn to_settings(&self, prefix: &str) -> SlotSettings {
        SlotSettings::from_values(
            prefix,
            self.root.as_ref(),
            self.remote_parent_sampled.as_ref(),
            self.remote_parent_not_sampled.as_ref(),
        )
    }
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct YamlGranularity {
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub enabled: Option<bool>,
    #[serde(rename = "type", deserialize_with = "deserialize_optional_string")]
    pub partial_type: Option<String>,
    #[serde(flatten)]
    pub slots: YamlSlots,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct YamlSamplerConfig {
    #[serde(deserialize_with = "deserialize_optional_number")]
    pub adaptive_sampling_target: Option<u32>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub adaptive_sampling_period: Option<Duration>,

    #[serde(flatten)]
    pub slots: YamlSlots,

    pub full_granularity: YamlGranularity,
    pub partial_granularity: YamlGranularity,
}

impl YamlSamplerConfig {
    fn to_settings(&self) -> SamplerSettings {
        SamplerSettings {
            base: self.slots.to_settings(""),
            full_granularity_enabled: self.full_granularity.enabled,
            full_granularity: self.full_granularity.slots.to_settings("full_granularity."),
            partial_granularity_enabled: self.partial_granularity.enabled,
            partial_granularity_type: self
                .partial_granularity
                .partial_type
                .as_deref()
                .map(PartialType::parse_or_default),
            partial_granularity: self
                .partial_granularity
                .slots
                .to_settings("partial_granularity."),
        }
    }
}

fn merge_config(config: &mut Config, yaml_config: &YamlConfig) {
    merge_option_to_value!(config, yaml_config, log_level);

    merge_option!(config, yaml_config, account_id);
    merge_option!(config, yaml_config, trusted_account_key);
    merge_option!(config, yaml_config, primary_application_id);

    merge_option_to_value!(config, span_events_enabled, yaml_config.span_events, enabled);
    merge_option_to_value!(
        config,
        span_events_max_samples_stored,
        yaml_config.span_events,
        max_samples_stored
    );
    merge_option_to_value!(
        config,
        transaction_events_enabled,
        yaml_config.transaction_events,
        enabled
    );
    merge_option_to_value!(
        config,
        transaction_events_max_samples_stored,
        yaml_config.transaction_events,
        max_samples_stored
    );

    let tracing = &yaml_config.distributed_tracing;
    if let Some(exclude) = tracing.exclude_newrelic_header {
        config.include_newrelic_header = !exclude;
    }

    merge_option_to_value!(
        config,
        adaptive_sampling_target,
        tracing.sampler,
        adaptive_sampling_target
    );
    merge_option_to_value!(
        config,
        adaptive_sampling_period,
        tracing.sampler,
        adaptive_sampling_period
    );

    config.sampler.merge(&tracing.sampler.to_settings());
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Yaml::file(self.path.clone()));

        match figment.extract::<YamlConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from yaml file: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::{sampler::SamplerConfig, ConfigBuilder};

    fn load() -> Config {
        ConfigBuilder::default()
            .add_source(Box::new(YamlConfigSource {
                path: Path::new("newrelic.yml").to_path_buf(),
            }))
            .build()
    }

    #[test]
    fn test_merge_config_overrides_with_yaml_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "newrelic.yml",
                r"
log_level: debug
account_id: 33
trusted_account_key: 1
primary_application_id: 2827902
span_events:
  enabled: false
  max_samples_stored: 500
transaction_events:
  max_samples_stored: 1000
distributed_tracing:
  exclude_newrelic_header: true
  sampler:
    adaptive_sampling_target: 10
    adaptive_sampling_period: 5
    root:
      trace_id_ratio_based:
        ratio: 0.1
    remote_parent_sampled: always_on
    remote_parent_not_sampled:
      adaptive:
        sampling_target: 15
",
            )?;

            let config = load();
            assert_eq!(config.log_level, LogLevel::Debug);
            assert_eq!(config.account_id.as_deref(), Some("33"));
            assert_eq!(config.trusted_account_key.as_deref(), Some("1"));
            assert_eq!(config.primary_application_id.as_deref(), Some("2827902"));
            assert!(!config.span_events_enabled);
            assert_eq!(config.span_events_max_samples_stored, 500);
            assert!(config.transaction_events_enabled);
            assert_eq!(config.transaction_events_max_samples_stored, 1000);
            assert!(!config.include_newrelic_header);
            assert_eq!(config.adaptive_sampling_target, 10);
            assert_eq!(config.adaptive_sampling_period, Duration::from_secs(5));

            let samplers = config.sampler_tree().full_granularity.samplers;
            assert_eq!(
                samplers.root,
                SamplerConfig::TraceIdRatioBased { ratio: 0.1 }
            );
            assert_eq!(samplers.remote_parent_sampled, SamplerConfig::AlwaysOn);
            assert_eq!(
                samplers.remote_parent_not_sampled,
                SamplerConfig::Adaptive {
                    sampling_target: Some(15)
                }
            );
            Ok(())
        });
    }

    #[test]
    fn test_granularity_sections() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "newrelic.yml",
                r"
distributed_tracing:
  sampler:
    root: always_on
    full_granularity:
      enabled: false
      remote_parent_sampled: always_off
    partial_granularity:
      enabled: true
      type: reduced
      root:
        trace_id_ratio_based:
          ratio: 0.3
      remote_parent_not_sampled: always_off
",
            )?;

            let tree = load().sampler_tree();
            assert!(!tree.full_granularity.enabled);
            assert_eq!(tree.full_granularity.samplers.root, SamplerConfig::AlwaysOn);
            assert_eq!(
                tree.full_granularity.samplers.remote_parent_sampled,
                SamplerConfig::AlwaysOff
            );
            assert!(tree.partial_granularity.enabled);
            assert_eq!(tree.partial_type, PartialType::Reduced);
            assert_eq!(
                tree.partial_granularity.samplers.root,
                SamplerConfig::TraceIdRatioBased { ratio: 0.3 }
            );
            assert_eq!(
                tree.partial_granularity.samplers.remote_parent_sampled,
                SamplerConfig::default()
            );
            assert_eq!(
                tree.partial_granularity.samplers.remote_parent_not_sampled,
                SamplerConfig::AlwaysOff
            );
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "newrelic.yml",
                r"
log_level: chatty
span_events:
  max_samples_stored: lots
distributed_tracing:
  sampler:
    adaptive_sampling_target: many
    root:
      always_on: {}
      always_off: {}
",
            )?;

            let config = load();
            assert_eq!(config.log_level, LogLevel::Warn);
            assert_eq!(config.span_events_max_samples_stored, 2000);
            assert_eq!(config.adaptive_sampling_target, 120);
            assert_eq!(
                config.sampler_tree().full_granularity.samplers.root,
                SamplerConfig::default()
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            assert_eq!(load(), Config::default());
            Ok(())
        });
    }
}
