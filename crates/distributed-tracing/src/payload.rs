// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Distributed trace payload.
//!
//! A [`DistributedTracePayload`] is immutable and only comes out of a
//! [`DistributedTracePayloadBuilder`]. The builder yields `None` rather than a half-formed
//! payload when the account id (or trace id) is missing: an agent that has not connected yet
//! simply propagates nothing.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::priority;
use crate::sampled::Sampled;

/// Highest major version of the compact payload format we read and the version we write.
pub const MAJOR_VERSION: u32 = 0;
pub const MINOR_VERSION: u32 = 1;

/// Kind of agent that created a payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ParentType {
    #[default]
    App,
    Browser,
    Mobile,
}

impl ParentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParentType::App => "App",
            ParentType::Browser => "Browser",
            ParentType::Mobile => "Mobile",
        }
    }

    /// Integer form used in `tracestate`.
    #[must_use]
    pub fn as_int(self) -> u8 {
        match self {
            ParentType::App => 0,
            ParentType::Browser => 1,
            ParentType::Mobile => 2,
        }
    }

    #[must_use]
    pub fn from_int(value: u8) -> Option<Self> {
        match value {
            0 => Some(ParentType::App),
            1 => Some(ParentType::Browser),
            2 => Some(ParentType::Mobile),
            _ => None,
        }
    }
}

impl FromStr for ParentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "App" => Ok(ParentType::App),
            "Browser" => Ok(ParentType::Browser),
            "Mobile" => Ok(ParentType::Mobile),
            _ => Err(format!("Invalid parent type: '{s}'")),
        }
    }
}

impl fmt::Display for ParentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who we are on the wire. Empty until a connect handshake or local configuration says so.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub account_id: Option<String>,
    pub trust_key: Option<String>,
    pub application_id: Option<String>,
}

impl Identity {
    /// The trust key, falling back to the account id.
    #[must_use]
    pub fn trust_key(&self) -> Option<&str> {
        self.trust_key.as_deref().or(self.account_id.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DistributedTracePayload {
    major_version: u32,
    minor_version: u32,
    parent_type: ParentType,
    account_id: String,
    application_id: Option<String>,
    trust_key: Option<String>,
    guid: Option<String>,
    trace_id: String,
    transaction_id: Option<String>,
    priority: Option<f32>,
    sampled: Sampled,
    timestamp: u64,
}

impl DistributedTracePayload {
    #[must_use]
    pub fn builder() -> DistributedTracePayloadBuilder {
        DistributedTracePayloadBuilder::default()
    }

    #[must_use]
    pub fn version(&self) -> (u32, u32) {
        (self.major_version, self.minor_version)
    }

    #[must_use]
    pub fn parent_type(&self) -> ParentType {
        self.parent_type
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    #[must_use]
    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    /// The trust key as carried. `None` on an inbound payload means it equals the account id.
    #[must_use]
    pub fn trust_key(&self) -> Option<&str> {
        self.trust_key.as_deref()
    }

    /// The trust key a receiver should check: the carried one, or else the account id.
    #[must_use]
    pub fn effective_trust_key(&self) -> &str {
        self.trust_key.as_deref().unwrap_or(&self.account_id)
    }

    /// Span id of the caller, present when span events are enabled.
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Transaction id of the caller, present when transaction events are enabled.
    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    #[must_use]
    pub fn priority(&self) -> Option<f32> {
        self.priority
    }

    #[must_use]
    pub fn sampled(&self) -> Sampled {
        self.sampled
    }

    /// Creation time, milliseconds since the epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

#[derive(Clone, Debug, Default)]
pub struct DistributedTracePayloadBuilder {
    version: Option<(u32, u32)>,
    parent_type: ParentType,
    account_id: Option<String>,
    application_id: Option<String>,
    trust_key: Option<String>,
    guid: Option<String>,
    trace_id: Option<String>,
    transaction_id: Option<String>,
    priority: Option<f32>,
    sampled: Option<Sampled>,
    timestamp: Option<u64>,
}

/// Empty strings count as absent.
fn non_empty(value: Option<impl Into<String>>) -> Option<String> {
    value.map(Into::into).filter(|s| !s.is_empty())
}

impl DistributedTracePayloadBuilder {
    #[must_use]
    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.version = Some((major, minor));
        self
    }

    #[must_use]
    pub fn parent_type(mut self, parent_type: ParentType) -> Self {
        self.parent_type = parent_type;
        self
    }

    #[must_use]
    pub fn account_id(mut self, account_id: Option<impl Into<String>>) -> Self {
        self.account_id = non_empty(account_id);
        self
    }

    #[must_use]
    pub fn application_id(mut self, application_id: Option<impl Into<String>>) -> Self {
        self.application_id = non_empty(application_id);
        self
    }

    #[must_use]
    pub fn trust_key(mut self, trust_key: Option<impl Into<String>>) -> Self {
        self.trust_key = non_empty(trust_key);
        self
    }

    #[must_use]
    pub fn guid(mut self, guid: Option<impl Into<String>>) -> Self {
        self.guid = non_empty(guid);
        self
    }

    #[must_use]
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = non_empty(Some(trace_id));
        self
    }

    #[must_use]
    pub fn transaction_id(mut self, transaction_id: Option<impl Into<String>>) -> Self {
        self.transaction_id = non_empty(transaction_id);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: Option<f32>) -> Self {
        self.priority = priority.filter(|p| p.is_finite());
        self
    }

    /// Defaults to the flag implied by the priority, or `Unknown` without one.
    #[must_use]
    pub fn sampled(mut self, sampled: Sampled) -> Self {
        self.sampled = Some(sampled);
        self
    }

    /// Defaults to now.
    #[must_use]
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// `None` when the account id or the trace id is missing.
    #[must_use]
    pub fn build(self) -> Option<DistributedTracePayload> {
        let account_id = self.account_id?;
        let trace_id = self.trace_id?;
        let (major_version, minor_version) = self.version.unwrap_or((MAJOR_VERSION, MINOR_VERSION));
        let sampled = self.sampled.unwrap_or_else(|| {
            self.priority
                .map_or(Sampled::Unknown, |p| Sampled::from(priority::is_sampled(p)))
        });
        Some(DistributedTracePayload {
            major_version,
            minor_version,
            parent_type: self.parent_type,
            account_id,
            application_id: self.application_id,
            trust_key: self.trust_key,
            guid: self.guid,
            trace_id,
            transaction_id: self.transaction_id,
            priority: self.priority,
            sampled,
            timestamp: self.timestamp.unwrap_or_else(now_millis),
        })
    }
}

/// Milliseconds since the epoch. A clock before 1970 reads as zero.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn builder() -> DistributedTracePayloadBuilder {
        DistributedTracePayload::builder()
            .account_id(Some("12345"))
            .trace_id("3221bf09aa0bcf0d")
    }

    #[test]
    fn test_build_requires_account_id() {
        let missing = DistributedTracePayload::builder()
            .trace_id("3221bf09aa0bcf0d")
            .build();
        assert!(missing.is_none());

        let empty = DistributedTracePayload::builder()
            .account_id(Some(""))
            .trace_id("3221bf09aa0bcf0d")
            .build();
        assert!(empty.is_none());

        let no_trace = DistributedTracePayload::builder()
            .account_id(Some("12345"))
            .build();
        assert!(no_trace.is_none());
    }

    #[test]
    fn test_build_defaults() {
        let payload = builder().build().unwrap();
        assert_eq!(payload.version(), (0, 1));
        assert_eq!(payload.parent_type(), ParentType::App);
        assert_eq!(payload.account_id(), "12345");
        assert_eq!(payload.application_id(), None);
        assert_eq!(payload.effective_trust_key(), "12345");
        assert_eq!(payload.sampled(), Sampled::Unknown);
        assert!(payload.timestamp() > 0);
    }

    #[test]
    fn test_sampled_follows_priority() {
        let payload = builder().priority(Some(1.25)).build().unwrap();
        assert_eq!(payload.sampled(), Sampled::Yes);
        let payload = builder().priority(Some(0.25)).build().unwrap();
        assert_eq!(payload.sampled(), Sampled::No);
        let payload = builder()
            .priority(Some(0.25))
            .sampled(Sampled::Yes)
            .build()
            .unwrap();
        assert_eq!(payload.sampled(), Sampled::Yes);
        let payload = builder().priority(Some(f32::NAN)).build().unwrap();
        assert_eq!(payload.priority(), None);
    }

    #[test]
    fn test_empty_application_id_is_absent() {
        let payload = builder().application_id(Some("")).build().unwrap();
        assert_eq!(payload.application_id(), None);
    }

    #[test]
    fn test_parent_type_forms() {
        assert_eq!("Mobile".parse::<ParentType>().unwrap(), ParentType::Mobile);
        assert!("app".parse::<ParentType>().is_err());
        assert_eq!(ParentType::from_int(1), Some(ParentType::Browser));
        assert_eq!(ParentType::from_int(3), None);
        assert_eq!(ParentType::Browser.as_int(), 1);
        assert_eq!(ParentType::App.to_string(), "App");
    }

    #[test]
    fn test_identity_trust_key_fallback() {
        let identity = Identity {
            account_id: Some("33".to_string()),
            trust_key: None,
            application_id: None,
        };
        assert_eq!(identity.trust_key(), Some("33"));
        assert_eq!(Identity::default().trust_key(), None);
    }
}
