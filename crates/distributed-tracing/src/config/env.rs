// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `NEW_RELIC_*` environment variables.
//!
//! Sampler slots are flattened: `NEW_RELIC_DISTRIBUTED_TRACING_SAMPLER_ROOT` names the type and
//! `NEW_RELIC_DISTRIBUTED_TRACING_SAMPLER_ROOT_TRACE_ID_RATIO_BASED_RATIO` or
//! `..._ROOT_ADAPTIVE_SAMPLING_TARGET` carry its option. The same pattern applies under
//! `..._SAMPLER_FULL_GRANULARITY_` and `..._SAMPLER_PARTIAL_GRANULARITY_`.

use std::time::Duration;

use figment::{providers::Env, Figment};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    config::{
        deserialize_optional_bool_from_anything, deserialize_optional_duration_from_seconds,
        deserialize_optional_number, deserialize_optional_string, deserialize_string_or_int,
        log_level::LogLevel,
        sampler::{
            PartialType, SamplerSettings, SlotSettings, ADAPTIVE, DEFAULT, SAMPLING_TARGET,
            TRACE_ID_RATIO_BASED,
        },
        Config, ConfigError, ConfigSource,
    },
    merge_option, merge_option_to_value,
};

pub const ENV_PREFIX: &str = "NEW_RELIC_";

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EnvConfig {
    pub log_level: Option<LogLevel>,

    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub account_id: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub trusted_account_key: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub primary_application_id: Option<String>,

    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub span_events_enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_number")]
    pub span_events_max_samples_stored: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub transaction_events_enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_number")]
    pub transaction_events_max_samples_stored: Option<usize>,

    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub distributed_tracing_exclude_newrelic_header: Option<bool>,

    #[serde(deserialize_with = "deserialize_optional_number")]
    pub distributed_tracing_sampler_adaptive_sampling_target: Option<u32>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub distributed_tracing_sampler_adaptive_sampling_period: Option<Duration>,

    // Base slots
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_root: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_root_trace_id_ratio_based_ratio: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_root_adaptive_sampling_target: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_remote_parent_sampled: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_remote_parent_sampled_trace_id_ratio_based_ratio:
        Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_remote_parent_sampled_adaptive_sampling_target:
        Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_remote_parent_not_sampled: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_remote_parent_not_sampled_trace_id_ratio_based_ratio:
        Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_remote_parent_not_sampled_adaptive_sampling_target:
        Option<String>,

    // Full granularity
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub distributed_tracing_sampler_full_granularity_enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_full_granularity_root: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_full_granularity_root_trace_id_ratio_based_ratio:
        Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_full_granularity_remote_parent_sampled: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_full_granularity_remote_parent_sampled_trace_id_ratio_based_ratio:
        Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_full_granularity_remote_parent_not_sampled: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_full_granularity_remote_parent_not_sampled_trace_id_ratio_based_ratio:
        Option<String>,

    // Partial granularity
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub distributed_tracing_sampler_partial_granularity_enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_partial_granularity_type: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_partial_granularity_root: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_partial_granularity_root_trace_id_ratio_based_ratio:
        Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_partial_granularity_remote_parent_sampled: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_partial_granularity_remote_parent_sampled_trace_id_ratio_based_ratio:
        Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub distributed_tracing_sampler_partial_granularity_remote_parent_not_sampled: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub distributed_tracing_sampler_partial_granularity_remote_parent_not_sampled_trace_id_ratio_based_ratio:
        Option<String>,
}

/// Rebuilds the nested slot shape from a flattened type name and its option.
fn slot_value(
    sampler_type: Option<&String>,
    ratio: Option<&String>,
    sampling_target: Option<&String>,
) -> Option<Value> {
    let sampler_type = sampler_type?.trim().to_lowercase();
    let value = match sampler_type.as_str() {
        TRACE_ID_RATIO_BASED => match ratio {
            Some(ratio) => json!({ TRACE_ID_RATIO_BASED: { "ratio": ratio } }),
            None => json!(TRACE_ID_RATIO_BASED),
        },
        ADAPTIVE | DEFAULT => match sampling_target {
            Some(target) => json!({ ADAPTIVE: { SAMPLING_TARGET: target } }),
            None => json!(sampler_type),
        },
        _ => json!(sampler_type),
    };
    Some(value)
}

impl EnvConfig {
    fn base_slots(&self) -> SlotSettings {
        SlotSettings::from_values(
            "",
            slot_value(
                self.distributed_tracing_sampler_root.as_ref(),
                self.distributed_tracing_sampler_root_trace_id_ratio_based_ratio
                    .as_ref(),
                self.distributed_tracing_sampler_root_adaptive_sampling_target
                    .as_ref(),
            )
            .as_ref(),
            slot_value(
                self.distributed_tracing_sampler_remote_parent_sampled.as_ref(),
                self.distributed_tracing_sampler_remote_parent_sampled_trace_id_ratio_based_ratio
                    .as_ref(),
                self.distributed_tracing_sampler_remote_parent_sampled_adaptive_sampling_target
                    .as_ref(),
            )
            .as_ref(),
            slot_value(
                self.distributed_tracing_sampler_remote_parent_not_sampled
                    .as_ref(),
                self.distributed_tracing_sampler_remote_parent_not_sampled_trace_id_ratio_based_ratio
                    .as_ref(),
                self.distributed_tracing_sampler_remote_parent_not_sampled_adaptive_sampling_target
                    .as_ref(),
            )
            .as_ref(),
        )
    }

    fn full_granularity_slots(&self) -> SlotSettings {
        SlotSettings::from_values(
            "full_granularity.",
            slot_value(
                self.distributed_tracing_sampler_full_granularity_root.as_ref(),
                self.distributed_tracing_sampler_full_granularity_root_trace_id_ratio_based_ratio
                    .as_ref(),
                None,
            )
            .as_ref(),
            slot_value(
                self.distributed_tracing_sampler_full_granularity_remote_parent_sampled
                    .as_ref(),
                self.distributed_tracing_sampler_full_granularity_remote_parent_sampled_trace_id_ratio_based_ratio
                    .as_ref(),
                None,
            )
            .as_ref(),
            slot_value(
                self.distributed_tracing_sampler_full_granularity_remote_parent_not_sampled
                    .as_ref(),
                self.distributed_tracing_sampler_full_granularity_remote_parent_not_sampled_trace_id_ratio_based_ratio
                    .as_ref(),
                None,
            )
            .as_ref(),
        )
    }

    fn partial_granularity_slots(&self) -> SlotSettings {
        SlotSettings::from_values(
            "partial_granularity.",
            slot_value(
                self.distributed_tracing_sampler_partial_granularity_root
                    .as_ref(),
                self.distributed_tracing_sampler_partial_granularity_root_trace_id_ratio_based_ratio
                    .as_ref(),
                None,
            )
            .as_ref(),
            slot_value(
                self.distributed_tracing_sampler_partial_granularity_remote_parent_sampled
                    .as_ref(),
                self.distributed_tracing_sampler_partial_granularity_remote_parent_sampled_trace_id_ratio_based_ratio
                    .as_ref(),
                None,
            )
            .as_ref(),
            slot_value(
                self.distributed_tracing_sampler_partial_granularity_remote_parent_not_sampled
                    .as_ref(),
                self.distributed_tracing_sampler_partial_granularity_remote_parent_not_sampled_trace_id_ratio_based_ratio
                    .as_ref(),
                None,
            )
            .as_ref(),
        )
    }

    fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            base: self.base_slots(),
            full_granularity_enabled: self.distributed_tracing_sampler_full_granularity_enabled,
            full_granularity: self.full_granularity_slots(),
            partial_granularity_enabled: self
                .distributed_tracing_sampler_partial_granularity_enabled,
            partial_granularity_type: self
                .distributed_tracing_sampler_partial_granularity_type
                .as_deref()
                .map(PartialType::parse_or_default),
            partial_granularity: self.partial_granularity_slots(),
        }
    }
}

fn merge_config(config: &mut Config, env_config: &EnvConfig) {
    merge_option_to_value!(config, env_config, log_level);

    merge_option!(config, env_config, account_id);
    merge_option!(config, env_config, trusted_account_key);
    merge_option!(config, env_config, primary_application_id);

    merge_option_to_value!(config, env_config, span_events_enabled);
    merge_option_to_value!(config, env_config, span_events_max_samples_stored);
    merge_option_to_value!(config, env_config, transaction_events_enabled);
    merge_option_to_value!(config, env_config, transaction_events_max_samples_stored);

    if let Some(exclude) = env_config.distributed_tracing_exclude_newrelic_header {
        config.include_newrelic_header = !exclude;
    }

    merge_option_to_value!(
        config,
        adaptive_sampling_target,
        env_config,
        distributed_tracing_sampler_adaptive_sampling_target
    );
    merge_option_to_value!(
        config,
        adaptive_sampling_period,
        env_config,
        distributed_tracing_sampler_adaptive_sampling_period
    );

    config.sampler.merge(&env_config.sampler_settings());
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<EnvConfig>() {
            Ok(env_config) => merge_config(config, &env_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from environment variables: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}
