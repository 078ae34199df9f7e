// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! W3C `tracestate` header.
//!
//! `tracestate` is a comma separated list of `key=value` vendor entries. Ours is keyed
//! `<trust key>@nr` and carries nine `-` separated fields:
//!
//! ```text
//! 190@nr=0-0-709288-8599547-f85f42fd82a4cf1d-164d3b4b0d09cb05-1-0.789-1563574856827
//!        | |  |      |       |                |                | |     |
//!        | |  |      |       span id          transaction id   | |     timestamp (ms)
//!        | |  |      application id                            | priority
//!        | |  account id                                       sampled
//!        | parent type
//!        version
//! ```
//!
//! Every other entry belongs to another vendor and is passed through untouched, in order. If
//! any of them is malformed or two share a key, none of them are propagated.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::payload::ParentType;
use crate::priority;
use crate::propagation::error::{Error, ErrorKind};
use crate::sampled::Sampled;

pub const TRACESTATE_KEY: &str = "tracestate";

/// Separates the trust key from our fields.
pub const NR_VENDOR: &str = "@nr=";
pub const NR_TRACE_STATE_VERSION: u32 = 0;

/// Vendor entries we propagate besides our own.
pub const MAX_VENDOR_STATES: usize = 31;
/// Entries longer than this are dropped first when truncating.
pub const LONG_VENDOR_STATE_SIZE: usize = 128;

const CODEC: &str = "tracestate";
const NR_FIELD_COUNT: usize = 9;

lazy_static! {
    // https://www.w3.org/TR/trace-context/#key and #value
    static ref VENDOR_STATE_REGEX: Regex = Regex::new(concat!(
        r"^([a-z][_0-9a-z\-*/]{0,255}|[a-z0-9][_0-9a-z\-*/]{0,240}@[a-z][_0-9a-z\-*/]{0,13})",
        r"=[\x20-\x2b\x2d-\x3c\x3e-\x7e]{0,255}[\x21-\x2b\x2d-\x3c\x3e-\x7e]$"
    ))
    .expect("failed creating regex");
}

/// Our own `tracestate` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct NrTraceStateEntry {
    pub version: u32,
    pub trust_key: String,
    pub parent_type: ParentType,
    pub account_id: String,
    pub application_id: String,
    /// Empty on the wire when span events are disabled.
    pub span_id: Option<String>,
    /// Empty on the wire when transaction events are disabled.
    pub transaction_id: Option<String>,
    pub sampled: Sampled,
    pub priority: Option<f32>,
    pub timestamp: u64,
}

fn malformed(message: &'static str) -> Error {
    Error::extract(ErrorKind::Malformed, message, CODEC)
}

fn optional_field(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl NrTraceStateEntry {
    /// Parses a whole `<trust key>@nr=<fields>` entry and checks the trust key against ours.
    pub fn parse(entry: &str, trust_key: &str) -> Result<Self, Error> {
        let mut parts = entry.split(NR_VENDOR);
        let (Some(entry_trust_key), Some(fields), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("invalid New Relic entry"));
        };
        if fields.is_empty() {
            return Err(malformed("invalid New Relic entry"));
        }
        if entry_trust_key != trust_key {
            return Err(Error::extract(
                ErrorKind::Untrusted,
                "untrusted account key",
                CODEC,
            ));
        }

        let fields: Vec<&str> = fields.splitn(NR_FIELD_COUNT + 1, '-').collect();
        if fields.len() < NR_FIELD_COUNT {
            return Err(malformed("New Relic entry requires 9 fields"));
        }

        let version = fields[0]
            .parse::<u32>()
            .map_err(|_| malformed("invalid New Relic entry version"))?;
        let parent_type = fields[1]
            .parse::<u8>()
            .ok()
            .and_then(ParentType::from_int)
            .ok_or_else(|| {
                Error::extract(ErrorKind::Unsupported, "unsupported parent type", CODEC)
            })?;
        let account_id = optional_field(fields[2]).ok_or_else(|| {
            Error::extract(ErrorKind::Missing, "New Relic entry has no account id", CODEC)
        })?;
        let application_id = optional_field(fields[3]).ok_or_else(|| {
            Error::extract(ErrorKind::Missing, "New Relic entry has no application id", CODEC)
        })?;
        let timestamp = match fields[8] {
            "" => {
                return Err(Error::extract(
                    ErrorKind::Missing,
                    "New Relic entry has no timestamp",
                    CODEC,
                ))
            }
            ts => ts
                .parse::<u64>()
                .map_err(|_| malformed("invalid New Relic entry timestamp"))?,
        };

        Ok(Self {
            version,
            trust_key: entry_trust_key.to_string(),
            parent_type,
            account_id,
            application_id,
            span_id: optional_field(fields[4]),
            transaction_id: optional_field(fields[5]),
            sampled: Sampled::parse(Some(fields[6])),
            priority: priority::parse(fields[7]),
            timestamp,
        })
    }
}

/// Writes our entry. Absent span or transaction ids are written as empty fields.
impl std::fmt::Display for NrTraceStateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}-{}-{}-{}-{}-{}-{}-{}-{}",
            self.trust_key,
            NR_VENDOR,
            self.version,
            self.parent_type.as_int(),
            self.account_id,
            self.application_id,
            self.span_id.as_deref().unwrap_or_default(),
            self.transaction_id.as_deref().unwrap_or_default(),
            self.sampled,
            self.priority.map(priority::format).unwrap_or_default(),
            self.timestamp,
        )
    }
}

/// Inbound `tracestate`: our entry, if present and valid, plus everyone else's.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct W3CTraceState {
    vendor_states: Vec<String>,
    nr_entry: Option<NrTraceStateEntry>,
}

impl W3CTraceState {
    /// Parses every `tracestate` occurrence. Only an absent header is an error; a bad entry
    /// just leaves that part out.
    pub fn parse_headers(values: &[&str], trust_key: Option<&str>) -> Result<Self, Error> {
        if values.is_empty() {
            return Err(Error::extract(ErrorKind::Missing, "no tracestate", CODEC));
        }

        let nr_prefix = trust_key.map(|tk| format!("{tk}{NR_VENDOR}"));
        let mut vendor_states = Vec::new();
        let mut nr_state = None;
        for entry in values
            .iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
        {
            match &nr_prefix {
                Some(prefix) if entry.starts_with(prefix.as_str()) => nr_state = Some(entry),
                _ => vendor_states.push(entry.to_string()),
            }
        }

        if has_duplicate_keys(&vendor_states) || vendor_states.iter().any(|s| !is_valid(s)) {
            debug!("Dropping invalid vendor states from tracestate: {vendor_states:?}");
            vendor_states.clear();
        }

        let nr_entry = match (nr_state, trust_key) {
            (Some(entry), Some(trust_key)) => NrTraceStateEntry::parse(entry, trust_key)
                .map_err(|e| debug!("{e}"))
                .ok(),
            _ => {
                debug!("No trusted New Relic entry in tracestate");
                None
            }
        };

        Ok(Self {
            vendor_states,
            nr_entry,
        })
    }

    /// Other vendors' entries, in received order.
    #[must_use]
    pub fn vendor_states(&self) -> &[String] {
        &self.vendor_states
    }

    #[must_use]
    pub fn nr_entry(&self) -> Option<&NrTraceStateEntry> {
        self.nr_entry.as_ref()
    }
}

fn vendor_key(state: &str) -> &str {
    state.split('=').next().unwrap_or_default()
}

fn has_duplicate_keys(vendor_states: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(vendor_states.len());
    vendor_states.iter().any(|state| !seen.insert(vendor_key(state)))
}

fn is_valid(vendor_state: &str) -> bool {
    VENDOR_STATE_REGEX.is_match(vendor_state)
}

/// Caps the vendor list at [`MAX_VENDOR_STATES`], dropping long entries first and keeping the
/// survivors in order.
#[must_use]
pub fn truncate_vendor_states(vendor_states: &[String]) -> Vec<String> {
    if vendor_states.len() <= MAX_VENDOR_STATES {
        return vendor_states.to_vec();
    }

    let long_states = vendor_states
        .iter()
        .filter(|s| s.len() > LONG_VENDOR_STATE_SIZE)
        .count();
    let short_states = vendor_states.len() - long_states;
    let mut long_to_keep = MAX_VENDOR_STATES.saturating_sub(short_states);

    let mut kept = Vec::with_capacity(MAX_VENDOR_STATES);
    for state in vendor_states {
        if state.len() <= LONG_VENDOR_STATE_SIZE {
            kept.push(state.clone());
        } else if long_to_keep > 0 {
            kept.push(state.clone());
            long_to_keep -= 1;
        }
        if kept.len() >= MAX_VENDOR_STATES {
            break;
        }
    }
    kept
}

/// Outbound header value: our entry first, then the truncated vendor list.
#[must_use]
pub fn format_header(entry: &NrTraceStateEntry, vendor_states: &[String]) -> String {
    let mut header = entry.to_string();
    for state in truncate_vendor_states(vendor_states) {
        header.push(',');
        header.push_str(&state);
    }
    header
}
