// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-trace identity holder.
//!
//! One [`SpanProxy`] lives for the duration of one distributed trace inside this process. Its
//! inbound fields are set-once: the first writer wins and later writers are ignored without
//! error. The trace id is the exception. A locally generated placeholder may be replaced once,
//! by the first payload that is accepted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::ids;
use crate::payload::{now_millis, DistributedTracePayload, Identity};
use crate::propagation::{W3CTraceParent, W3CTraceState};

/// How the inbound request reached us. Reported as `parent.transportType`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportType {
    #[default]
    Unknown,
    Http,
    Https,
    Kafka,
    Jms,
    IronMq,
    Amqp,
    Queue,
    Other,
}

impl TransportType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Unknown => "Unknown",
            TransportType::Http => "HTTP",
            TransportType::Https => "HTTPS",
            TransportType::Kafka => "Kafka",
            TransportType::Jms => "JMS",
            TransportType::IronMq => "IronMQ",
            TransportType::Amqp => "AMQP",
            TransportType::Queue => "Queue",
            TransportType::Other => "Other",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct SpanProxy {
    trace_id: ArcSwapOption<String>,
    inbound_payload: OnceLock<DistributedTracePayload>,
    initiating_traceparent: OnceLock<W3CTraceParent>,
    initiating_tracestate: OnceLock<W3CTraceState>,
    transport_type: OnceLock<TransportType>,
    /// Start of the local unit of work, in epoch millis.
    timestamp: AtomicU64,
}

impl Default for SpanProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanProxy {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timestamp(now_millis())
    }

    #[must_use]
    pub fn with_timestamp(timestamp: u64) -> Self {
        Self {
            trace_id: ArcSwapOption::empty(),
            inbound_payload: OnceLock::new(),
            initiating_traceparent: OnceLock::new(),
            initiating_tracestate: OnceLock::new(),
            transport_type: OnceLock::new(),
            timestamp: AtomicU64::new(timestamp),
        }
    }

    /// The trace id, generating and storing one on first use.
    ///
    /// Racing callers all observe the same id.
    #[must_use]
    pub fn get_or_create_trace_id(&self) -> String {
        if let Some(trace_id) = self.trace_id.load_full() {
            return trace_id.to_string();
        }

        let generated = Arc::new(ids::generate_trace_id());
        let previous = self
            .trace_id
            .rcu(|current| current.clone().or_else(|| Some(Arc::clone(&generated))));
        previous.map_or_else(|| generated.to_string(), |id| id.to_string())
    }

    /// The trace id if one has been set or generated.
    #[must_use]
    pub fn trace_id(&self) -> Option<String> {
        self.trace_id.load_full().map(|id| id.to_string())
    }

    /// Stores the inbound payload if none has been accepted yet.
    ///
    /// On success the payload's trace id replaces any generated placeholder. Returns `false`
    /// when another payload already won.
    pub fn accept_distributed_trace_payload(&self, payload: DistributedTracePayload) -> bool {
        let trace_id = Arc::new(payload.trace_id().to_string());
        if self.inbound_payload.set(payload).is_err() {
            debug!("Payload already accepted for this trace, ignoring");
            return false;
        }
        self.trace_id.store(Some(trace_id));
        true
    }

    #[must_use]
    pub fn inbound_payload(&self) -> Option<&DistributedTracePayload> {
        self.inbound_payload.get()
    }

    /// Records the inbound `traceparent`. Its trace id becomes ours unless a payload already
    /// set one.
    pub fn set_initiating_w3c_traceparent(&self, traceparent: W3CTraceParent) -> bool {
        let trace_id = Arc::new(traceparent.trace_id().to_string());
        if self.initiating_traceparent.set(traceparent).is_err() {
            return false;
        }
        // An accept racing this swap changes `trace_id`, so the retry sees its payload.
        self.trace_id.rcu(|current| {
            if self.inbound_payload.get().is_some() {
                current.clone()
            } else {
                Some(Arc::clone(&trace_id))
            }
        });
        true
    }

    #[must_use]
    pub fn initiating_w3c_traceparent(&self) -> Option<&W3CTraceParent> {
        self.initiating_traceparent.get()
    }

    pub fn set_initiating_w3c_tracestate(&self, tracestate: W3CTraceState) -> bool {
        self.initiating_tracestate.set(tracestate).is_ok()
    }

    #[must_use]
    pub fn initiating_w3c_tracestate(&self) -> Option<&W3CTraceState> {
        self.initiating_tracestate.get()
    }

    /// Vendor entries to forward on outbound `tracestate`.
    #[must_use]
    pub fn vendor_states(&self) -> &[String] {
        self.initiating_tracestate
            .get()
            .map(W3CTraceState::vendor_states)
            .unwrap_or_default()
    }

    pub fn set_transport_type(&self, transport_type: TransportType) -> bool {
        self.transport_type.set(transport_type).is_ok()
    }

    #[must_use]
    pub fn transport_type(&self) -> Option<TransportType> {
        self.transport_type.get().copied()
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.timestamp.store(timestamp, Ordering::Relaxed);
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Milliseconds between the caller sending the payload and us starting work. `None` without
    /// an inbound payload, or when clock skew makes the duration negative.
    #[must_use]
    pub fn transport_duration_ms(&self) -> Option<u64> {
        let payload = self.inbound_payload.get()?;
        self.timestamp().checked_sub(payload.timestamp())
    }

    /// Builds the outbound payload for a call made by this unit of work.
    ///
    /// `None` when we have no account id yet. Inbound state is left untouched.
    #[must_use]
    pub fn create_distributed_trace_payload(
        &self,
        identity: &Identity,
        priority: f32,
        span_id: Option<&str>,
        transaction_id: Option<&str>,
    ) -> Option<DistributedTracePayload> {
        // Checked first so that no trace id is generated for nothing.
        identity.account_id.as_ref()?;
        DistributedTracePayload::builder()
            .account_id(identity.account_id.as_deref())
            .trust_key(identity.trust_key())
            .application_id(identity.application_id.as_deref())
            .guid(span_id)
            .trace_id(self.get_or_create_trace_id())
            .transaction_id(transaction_id)
            .priority(Some(priority))
            .build()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sampled::Sampled;
    use std::thread;

    fn payload(trace_id: &str) -> DistributedTracePayload {
        DistributedTracePayload::builder()
            .account_id(Some("33"))
            .application_id(Some("2827902"))
            .trace_id(trace_id)
            .priority(Some(1.5))
            .timestamp(1_000)
            .build()
            .unwrap()
    }

    fn identity() -> Identity {
        Identity {
            account_id: Some("33".to_string()),
            trust_key: Some("1".to_string()),
            application_id: Some("2827902".to_string()),
        }
    }

    #[test]
    fn test_trace_id_is_generated_once() {
        let proxy = SpanProxy::new();
        assert_eq!(proxy.trace_id(), None);
        let first = proxy.get_or_create_trace_id();
        assert_eq!(first.len(), 32);
        assert_eq!(proxy.get_or_create_trace_id(), first);
        assert_eq!(proxy.trace_id(), Some(first));
    }

    #[test]
    fn test_accepted_payload_replaces_generated_trace_id() {
        let proxy = SpanProxy::new();
        let generated = proxy.get_or_create_trace_id();

        assert!(proxy.accept_distributed_trace_payload(payload("abc123")));
        assert_ne!(proxy.get_or_create_trace_id(), generated);
        assert_eq!(proxy.get_or_create_trace_id(), "abc123");

        assert!(!proxy.accept_distributed_trace_payload(payload("def456")));
        assert_eq!(proxy.get_or_create_trace_id(), "abc123");
        assert_eq!(proxy.inbound_payload().unwrap().trace_id(), "abc123");
    }

    #[test]
    fn test_traceparent_is_set_once_and_sets_trace_id() {
        let proxy = SpanProxy::new();
        let first = W3CTraceParent::parse(
            "00-12345678123456781234567812345678-1234123412341234-01",
        )
        .unwrap();
        let second = W3CTraceParent::parse(
            "00-87654321876543218765432187654321-4321432143214321-00",
        )
        .unwrap();

        assert!(proxy.set_initiating_w3c_traceparent(first.clone()));
        assert!(!proxy.set_initiating_w3c_traceparent(second));
        assert_eq!(proxy.initiating_w3c_traceparent(), Some(&first));
        assert_eq!(
            proxy.get_or_create_trace_id(),
            "12345678123456781234567812345678"
        );
    }

    #[test]
    fn test_traceparent_does_not_override_accepted_payload() {
        let proxy = SpanProxy::new();
        assert!(proxy.accept_distributed_trace_payload(payload("abc123")));
        let traceparent = W3CTraceParent::parse(
            "00-12345678123456781234567812345678-1234123412341234-01",
        )
        .unwrap();
        assert!(proxy.set_initiating_w3c_traceparent(traceparent));
        assert_eq!(proxy.get_or_create_trace_id(), "abc123");
    }

    #[test]
    fn test_tracestate_and_transport_are_set_once() {
        let proxy = SpanProxy::new();
        let state = W3CTraceState::parse_headers(&["dd=s:1,rojo=00f067aa0ba902b7"], Some("1"))
            .unwrap();
        assert!(proxy.set_initiating_w3c_tracestate(state));
        assert!(!proxy.set_initiating_w3c_tracestate(W3CTraceState::default()));
        assert_eq!(proxy.vendor_states().len(), 2);

        assert!(proxy.set_transport_type(TransportType::Kafka));
        assert!(!proxy.set_transport_type(TransportType::Http));
        assert_eq!(proxy.transport_type(), Some(TransportType::Kafka));
    }

    #[test]
    fn test_transport_duration() {
        let proxy = SpanProxy::with_timestamp(1_500);
        assert_eq!(proxy.transport_duration_ms(), None);
        assert!(proxy.accept_distributed_trace_payload(payload("abc123")));
        assert_eq!(proxy.transport_duration_ms(), Some(500));

        proxy.set_timestamp(500);
        assert_eq!(proxy.transport_duration_ms(), None);
    }

    #[test]
    fn test_create_payload_requires_account_id() {
        let proxy = SpanProxy::new();
        assert!(proxy
            .create_distributed_trace_payload(&Identity::default(), 1.2, None, None)
            .is_none());
        assert_eq!(proxy.trace_id(), None);

        let payload = proxy
            .create_distributed_trace_payload(
                &identity(),
                1.2,
                Some("27856f70d3d314b7"),
                Some("7d3efb1b173fecfa"),
            )
            .unwrap();
        assert_eq!(payload.account_id(), "33");
        assert_eq!(payload.trust_key(), Some("1"));
        assert_eq!(payload.guid(), Some("27856f70d3d314b7"));
        assert_eq!(payload.transaction_id(), Some("7d3efb1b173fecfa"));
        assert_eq!(payload.trace_id(), proxy.get_or_create_trace_id());
        assert_eq!(payload.sampled(), Sampled::Yes);
        assert!(proxy.inbound_payload().is_none());
    }

    #[test]
    fn test_racing_accepts_have_one_winner() {
        let proxy = Arc::new(SpanProxy::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let proxy = Arc::clone(&proxy);
                thread::spawn(move || {
                    proxy.accept_distributed_trace_payload(payload(&format!("{i}")))
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|accepted| *accepted)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(
            proxy.get_or_create_trace_id(),
            proxy.inbound_payload().unwrap().trace_id()
        );
    }

    #[test]
    fn test_accepted_payload_wins_race_with_traceparent() {
        use std::sync::Barrier;

        let traceparent = W3CTraceParent::new(
            "0af7651916cd43dd8448eb211c80319c",
            "00f067aa0ba902b7",
            true,
        );
        for i in 0..500 {
            let proxy = Arc::new(SpanProxy::new());
            let barrier = Arc::new(Barrier::new(2));
            let w3c = {
                let (proxy, barrier, traceparent) =
                    (Arc::clone(&proxy), Arc::clone(&barrier), traceparent.clone());
                thread::spawn(move || {
                    barrier.wait();
                    proxy.set_initiating_w3c_traceparent(traceparent)
                })
            };
            let accept = {
                let (proxy, barrier) = (Arc::clone(&proxy), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    proxy.accept_distributed_trace_payload(payload(&format!("{i:016x}")))
                })
            };
            assert!(w3c.join().unwrap());
            assert!(accept.join().unwrap());
            assert_eq!(
                proxy.trace_id().as_deref(),
                Some(proxy.inbound_payload().unwrap().trace_id())
            );
        }
    }

    #[test]
    fn test_racing_trace_id_creation_agrees() {
        let proxy = Arc::new(SpanProxy::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let proxy = Arc::clone(&proxy);
                thread::spawn(move || proxy.get_or_create_trace_id())
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
    }
}
