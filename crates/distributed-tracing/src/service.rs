// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Distributed trace orchestrator.
//!
//! [`DistributedTraceService`] owns everything shared between concurrent traces: the connection
//! identity, the samplers for each granularity, and the span and transaction event reservoirs.
//! Per-trace state lives in a [`SpanProxy`] the caller hands in.
//!
//! # Sampling
//!
//! A trace's priority is decided once, in [`DistributedTraceService::calculate_priority`]:
//!
//! ```text
//! full granularity sampler for the case ── sampled ──> base + 2.0
//!        │ not sampled
//!        ▼
//! partial granularity sampler for the case ── sampled ──> base + 1.0
//!        │ not sampled
//!        ▼
//!      base
//! ```
//!
//! When the case has a remote parent and the sampler consulted is adaptive, the priority the
//! parent propagated is reused as is so that every service in the trace agrees.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use crate::config::{sampler::PartialType, Config};
use crate::payload::{DistributedTracePayload, Identity, ParentType, MAJOR_VERSION, MINOR_VERSION};
use crate::priority::{self, Granularity};
use crate::propagation::{
    newrelic,
    tracestate::{self, NR_TRACE_STATE_VERSION},
    Extractor, Injector, NrTraceStateEntry, W3CTraceParent, W3CTraceState, NEWRELIC_HEADER,
    TRACEPARENT_KEY, TRACESTATE_KEY,
};
use crate::reservoir::{Drained, PriorityAware, ReservoirRegistry};
use crate::samplers::{
    sampler_id, AdaptiveSampler, CaseSamplers, Sampler, SamplerFactory, SamplerType, SamplingCase,
};
use crate::span_proxy::SpanProxy;

pub use crate::span_proxy::TransportType;

/// Application id reported before the collector assigned one.
pub const UNKNOWN_APPLICATION_ID: &str = "0";

/// What the collector tells us on connect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectInfo {
    pub account_id: Option<String>,
    pub trusted_account_key: Option<String>,
    pub primary_application_id: Option<String>,
    pub sampling_target: Option<u32>,
}

/// Outcome of [`DistributedTraceService::calculate_priority`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingDecision {
    pub priority: f32,
    /// Set when the trace is recorded at partial granularity.
    pub partial_type: Option<PartialType>,
}

impl SamplingDecision {
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        priority::is_sampled(self.priority)
    }

    #[must_use]
    pub fn granularity(&self) -> Option<Granularity> {
        priority::granularity(self.priority)
    }
}

/// The local unit of work making an outbound call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutboundSpan<'a> {
    pub priority: f32,
    /// Guid of the span making the call, when spans are recorded.
    pub span_id: Option<&'a str>,
    pub transaction_id: &'a str,
}

enum Outcome {
    Inherited(f32),
    Sampled,
    NotSampled,
}

impl Outcome {
    fn is_fresh_adaptive(&self, sampler: &Arc<dyn Sampler>) -> bool {
        !matches!(self, Outcome::Inherited(_)) && sampler.sampler_type() == SamplerType::Adaptive
    }
}

fn run_sampler(
    sampler: &Arc<dyn Sampler>,
    case: SamplingCase,
    trace_id: &str,
    inbound_priority: Option<f32>,
) -> Outcome {
    if sampler.sampler_type() == SamplerType::Adaptive && case != SamplingCase::Root {
        if let Some(priority) = inbound_priority {
            return Outcome::Inherited(priority);
        }
    }
    if sampler.should_sample(trace_id) {
        Outcome::Sampled
    } else {
        Outcome::NotSampled
    }
}

pub struct DistributedTraceService<S, T> {
    identity: ArcSwap<Identity>,
    span_events_enabled: bool,
    transaction_events_enabled: bool,
    include_newrelic_header: bool,
    adaptive: Arc<AdaptiveSampler>,
    /// `None` when that granularity is disabled.
    full_granularity: Option<CaseSamplers>,
    partial_granularity: Option<CaseSamplers>,
    partial_type: PartialType,
    span_events: ReservoirRegistry<S>,
    transaction_events: ReservoirRegistry<T>,
}

impl<S: PriorityAware, T: PriorityAware> DistributedTraceService<S, T> {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let adaptive = Arc::new(AdaptiveSampler::new(
            config.adaptive_sampling_target,
            config.adaptive_sampling_period,
        ));
        let factory = SamplerFactory::new(Arc::clone(&adaptive));
        let tree = config.sampler_tree();

        let full_granularity = tree
            .full_granularity
            .enabled
            .then(|| factory.create_all(&tree.full_granularity.samplers));
        let partial_granularity = tree
            .partial_granularity
            .enabled
            .then(|| factory.create_all(&tree.partial_granularity.samplers));

        let span_capacity = if config.span_events_enabled {
            config.span_events_max_samples_stored
        } else {
            0
        };
        let transaction_capacity = if config.transaction_events_enabled {
            config.transaction_events_max_samples_stored
        } else {
            0
        };

        Self {
            identity: ArcSwap::from_pointee(Identity {
                account_id: config.account_id.clone(),
                trust_key: config.trusted_account_key.clone(),
                application_id: config.primary_application_id.clone(),
            }),
            span_events_enabled: config.span_events_enabled,
            transaction_events_enabled: config.transaction_events_enabled,
            include_newrelic_header: config.include_newrelic_header,
            adaptive,
            full_granularity,
            partial_granularity,
            partial_type: tree.partial_type,
            span_events: ReservoirRegistry::new(span_capacity),
            transaction_events: ReservoirRegistry::new(transaction_capacity),
        }
    }

    /// Applies the identity and sampling target handed out by the collector.
    pub fn connected(&self, info: ConnectInfo) {
        let trust_key = info
            .trusted_account_key
            .or_else(|| info.account_id.clone());
        let application_id = info
            .primary_application_id
            .or_else(|| Some(UNKNOWN_APPLICATION_ID.to_string()));
        info!(
            "Connected: account {:?}, trust key {:?}, application {:?}",
            info.account_id, trust_key, application_id
        );
        self.identity.store(Arc::new(Identity {
            account_id: info.account_id,
            trust_key,
            application_id,
        }));
        if let Some(target) = info.sampling_target {
            self.adaptive.set_target(target);
        }
    }

    /// Forgets the account id. Outbound payloads are not created until the next connect.
    pub fn disconnected(&self) {
        self.identity.rcu(|identity| Identity {
            account_id: None,
            ..Identity::clone(identity)
        });
        debug!("Disconnected, outbound payloads disabled");
    }

    #[must_use]
    pub fn identity(&self) -> Arc<Identity> {
        self.identity.load_full()
    }

    #[must_use]
    pub fn trusted_account_key(&self) -> Option<String> {
        self.identity.load().trust_key().map(str::to_string)
    }

    #[must_use]
    pub fn adaptive_sampler(&self) -> &Arc<AdaptiveSampler> {
        &self.adaptive
    }

    #[must_use]
    pub fn full_granularity_samplers(&self) -> Option<&CaseSamplers> {
        self.full_granularity.as_ref()
    }

    #[must_use]
    pub fn partial_granularity_samplers(&self) -> Option<&CaseSamplers> {
        self.partial_granularity.as_ref()
    }

    /// Decides the priority of a trace.
    ///
    /// `inbound_priority` is the decision propagated by a remote parent, if any. It is only
    /// reused by adaptive samplers and never for [`SamplingCase::Root`].
    pub fn calculate_priority(
        &self,
        case: SamplingCase,
        trace_id: &str,
        inbound_priority: Option<f32>,
    ) -> SamplingDecision {
        self.decide(case, trace_id, inbound_priority).0
    }

    /// The decision and whether an adaptive sampler drew a fresh one for it.
    fn decide(
        &self,
        case: SamplingCase,
        trace_id: &str,
        inbound_priority: Option<f32>,
    ) -> (SamplingDecision, bool) {
        let base = priority::next_base();
        let mut adaptive = false;

        if let Some(samplers) = &self.full_granularity {
            let sampler = samplers.for_case(case);
            let outcome = run_sampler(sampler, case, trace_id, inbound_priority);
            adaptive |= outcome.is_fresh_adaptive(sampler);
            match outcome {
                Outcome::Inherited(priority) => return (self.inherited(priority), adaptive),
                Outcome::Sampled => {
                    let decision = SamplingDecision {
                        priority: priority::encode(base, Some(Granularity::Full)),
                        partial_type: None,
                    };
                    return (decision, adaptive);
                }
                Outcome::NotSampled => {}
            }
        }

        if let Some(samplers) = &self.partial_granularity {
            let sampler = samplers.for_case(case);
            let outcome = run_sampler(sampler, case, trace_id, inbound_priority);
            adaptive |= outcome.is_fresh_adaptive(sampler);
            match outcome {
                Outcome::Inherited(priority) => return (self.inherited(priority), adaptive),
                Outcome::Sampled => {
                    let decision = SamplingDecision {
                        priority: priority::encode(base, Some(Granularity::Partial)),
                        partial_type: Some(self.partial_type),
                    };
                    return (decision, adaptive);
                }
                Outcome::NotSampled => {}
            }
        }

        let decision = SamplingDecision {
            priority: base,
            partial_type: None,
        };
        (decision, adaptive)
    }

    fn inherited(&self, priority: f32) -> SamplingDecision {
        let partial = priority::granularity(priority) == Some(Granularity::Partial);
        SamplingDecision {
            priority,
            partial_type: partial.then_some(self.partial_type),
        }
    }

    /// The sampling case for a trace and the priority its remote parent propagated.
    ///
    /// The `traceparent` flag decides the case when present, then the inbound payload's sampled
    /// flag. A propagated priority is only reported when the parent sent a sampled flag; a
    /// missing priority is then redrawn on the parent's side of the threshold.
    #[must_use]
    pub fn remote_parent_of(&self, proxy: &SpanProxy) -> (SamplingCase, Option<f32>) {
        let payload = proxy.inbound_payload();
        let remote_sampled = proxy
            .initiating_w3c_traceparent()
            .map(W3CTraceParent::sampled)
            .or_else(|| {
                payload
                    .map(DistributedTracePayload::sampled)
                    .filter(|sampled| !sampled.is_unknown())
                    .map(|sampled| sampled.boolean_value())
            });

        let inbound_priority = payload
            .filter(|payload| !payload.sampled().is_unknown())
            .map(|payload| {
                payload.priority().unwrap_or_else(|| {
                    let granularity = payload
                        .sampled()
                        .boolean_value()
                        .then_some(Granularity::Partial);
                    priority::encode(priority::next_base(), granularity)
                })
            });

        (SamplingCase::from_remote_parent(remote_sampled), inbound_priority)
    }

    /// Picks the case for `proxy` and decides its priority.
    ///
    /// A fresh adaptive decision is counted against `app_name`'s transaction event reservoir.
    pub fn assign_priority(&self, proxy: &SpanProxy, app_name: &str) -> SamplingDecision {
        let (case, inbound_priority) = self.remote_parent_of(proxy);
        let trace_id = proxy.get_or_create_trace_id();
        let (decision, adaptive) = self.decide(case, &trace_id, inbound_priority);
        if adaptive {
            self.transaction_events
                .get_or_create_reservoir(app_name)
                .active()
                .increment_decided();
        }
        debug!(
            "Sampling decision for trace {trace_id} ({case:?}): priority {}",
            decision.priority
        );
        decision
    }

    /// Builds the outbound payload for `proxy`. Span and transaction ids are left out when
    /// their events are disabled. `None` until an account id is known.
    #[must_use]
    pub fn create_distributed_trace_payload(
        &self,
        proxy: &SpanProxy,
        priority: f32,
        span_id: Option<&str>,
        transaction_id: &str,
    ) -> Option<DistributedTracePayload> {
        let identity = self.identity.load();
        let span_id = span_id.filter(|_| self.span_events_enabled);
        let transaction_id = Some(transaction_id).filter(|_| self.transaction_events_enabled);
        let payload =
            proxy.create_distributed_trace_payload(&identity, priority, span_id, transaction_id);
        if payload.is_none() {
            debug!("Not creating distributed trace payload: no account id");
        }
        payload
    }

    /// Decodes a `newrelic` header value and stores it on `proxy`. Invalid, untrusted or late
    /// payloads are ignored.
    pub fn accept_distributed_trace_payload(&self, proxy: &SpanProxy, header: &str) -> bool {
        let trust_key = self.trusted_account_key();
        match newrelic::decode(header, trust_key.as_deref()) {
            Ok(payload) => proxy.accept_distributed_trace_payload(payload),
            Err(e) => {
                debug!("{e}");
                false
            }
        }
    }

    /// Reads inbound trace context from `carrier` into `proxy`.
    ///
    /// W3C headers win whenever a `traceparent` is present; the `newrelic` header is only read
    /// otherwise. Returns whether a payload was accepted.
    pub fn accept_distributed_trace_headers(
        &self,
        proxy: &SpanProxy,
        transport: TransportType,
        carrier: &dyn Extractor,
    ) -> bool {
        proxy.set_transport_type(transport);

        let traceparents = carrier.get_all(TRACEPARENT_KEY);
        if !traceparents.is_empty() {
            return self.accept_w3c_headers(proxy, &traceparents, carrier);
        }

        match carrier.get(NEWRELIC_HEADER) {
            Some(header) => self.accept_distributed_trace_payload(proxy, header),
            None => false,
        }
    }

    fn accept_w3c_headers(
        &self,
        proxy: &SpanProxy,
        traceparents: &[&str],
        carrier: &dyn Extractor,
    ) -> bool {
        let traceparent = match W3CTraceParent::parse_headers(traceparents) {
            Ok(traceparent) => traceparent,
            Err(e) => {
                debug!("{e}");
                return false;
            }
        };

        let trust_key = self.trusted_account_key();
        let tracestate =
            match W3CTraceState::parse_headers(&carrier.get_all(TRACESTATE_KEY), trust_key.as_deref())
            {
                Ok(tracestate) => Some(tracestate),
                Err(e) => {
                    debug!("{e}");
                    None
                }
            };

        let payload = tracestate
            .as_ref()
            .and_then(W3CTraceState::nr_entry)
            .and_then(|entry| payload_from_trace_context(&traceparent, entry));

        proxy.set_initiating_w3c_traceparent(traceparent);
        if let Some(tracestate) = tracestate {
            proxy.set_initiating_w3c_tracestate(tracestate);
        }

        payload.is_some_and(|payload| proxy.accept_distributed_trace_payload(payload))
    }

    /// Writes `traceparent`, `tracestate` and, unless excluded, `newrelic` for an outbound call.
    ///
    /// Returns `false` and writes nothing until an account id is known.
    pub fn insert_distributed_trace_headers(
        &self,
        proxy: &SpanProxy,
        outbound: &OutboundSpan<'_>,
        carrier: &mut dyn Injector,
    ) -> bool {
        let Some(payload) = self.create_distributed_trace_payload(
            proxy,
            outbound.priority,
            outbound.span_id,
            outbound.transaction_id,
        ) else {
            return false;
        };

        let parent_id = outbound.span_id.unwrap_or(outbound.transaction_id);
        let traceparent = W3CTraceParent::new(
            payload.trace_id(),
            parent_id,
            priority::is_sampled(outbound.priority),
        );
        carrier.set(TRACEPARENT_KEY, traceparent.to_string());

        let entry = NrTraceStateEntry {
            version: NR_TRACE_STATE_VERSION,
            trust_key: payload.effective_trust_key().to_string(),
            parent_type: ParentType::App,
            account_id: payload.account_id().to_string(),
            application_id: payload
                .application_id()
                .unwrap_or(UNKNOWN_APPLICATION_ID)
                .to_string(),
            span_id: payload.guid().map(str::to_string),
            transaction_id: payload.transaction_id().map(str::to_string),
            sampled: payload.sampled(),
            priority: payload.priority(),
            timestamp: payload.timestamp(),
        };
        carrier.set(
            TRACESTATE_KEY,
            tracestate::format_header(&entry, proxy.vendor_states()),
        );

        if self.include_newrelic_header {
            match newrelic::encode(&payload) {
                Ok(header) => carrier.set(NEWRELIC_HEADER, header),
                Err(e) => debug!("{e}"),
            }
        }
        true
    }

    /// Distributed tracing attributes for the unit of work behind `proxy`.
    #[must_use]
    pub fn intrinsics(&self, proxy: &SpanProxy, guid: &str, priority: f32) -> Map<String, Value> {
        let mut attributes = Map::new();

        if let Some(payload) = proxy.inbound_payload() {
            attributes.insert(
                "parent.type".to_string(),
                Value::from(payload.parent_type().as_str()),
            );
            if let Some(app) = payload.application_id() {
                attributes.insert("parent.app".to_string(), Value::from(app));
            }
            attributes.insert(
                "parent.account".to_string(),
                Value::from(payload.account_id()),
            );
            if let Some(transaction_id) = payload.transaction_id() {
                attributes.insert("parentId".to_string(), Value::from(transaction_id));
            }
            if let Some(span_id) = payload.guid() {
                attributes.insert("parentSpanId".to_string(), Value::from(span_id));
            }
        }
        if let Some(transport) = proxy.transport_type() {
            attributes.insert(
                "parent.transportType".to_string(),
                Value::from(transport.as_str()),
            );
        }
        if let Some(duration) = proxy.transport_duration_ms() {
            let seconds = duration as f64 / 1000.0;
            if let Some(seconds) = Number::from_f64(seconds) {
                attributes.insert("parent.transportDuration".to_string(), Value::Number(seconds));
            }
        }

        attributes.insert("guid".to_string(), Value::from(guid));
        attributes.insert(
            "traceId".to_string(),
            Value::from(proxy.get_or_create_trace_id()),
        );
        if let Some(number) = priority::format(priority)
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
        {
            attributes.insert("priority".to_string(), Value::Number(number));
        }
        attributes.insert(
            "sampled".to_string(),
            Value::Bool(priority::is_sampled(priority)),
        );
        attributes
    }

    /// Rolls every distinct sampler over to a new period. Shared instances roll once.
    pub fn before_harvest(&self) {
        let shared: Arc<dyn Sampler> = Arc::clone(&self.adaptive) as Arc<dyn Sampler>;
        let mut seen = HashSet::new();
        let samplers = std::iter::once(&shared)
            .chain(self.full_granularity.iter().flat_map(CaseSamplers::iter))
            .chain(self.partial_granularity.iter().flat_map(CaseSamplers::iter));
        for sampler in samplers {
            if seen.insert(sampler_id(sampler)) {
                sampler.before_harvest();
            }
        }
        debug!("Rolled over {} samplers", seen.len());
    }

    /// Offers a span event to `app_name`'s reservoir.
    pub fn add_span_event(&self, app_name: &str, event: S) -> bool {
        self.span_events.get_or_create_reservoir(app_name).add(event)
    }

    /// Offers a transaction event to `app_name`'s reservoir.
    pub fn add_transaction_event(&self, app_name: &str, event: T) -> bool {
        self.transaction_events
            .get_or_create_reservoir(app_name)
            .add(event)
    }

    #[must_use]
    pub fn span_events(&self) -> &ReservoirRegistry<S> {
        &self.span_events
    }

    #[must_use]
    pub fn transaction_events(&self) -> &ReservoirRegistry<T> {
        &self.transaction_events
    }

    pub fn harvest_span_events(&self, app_name: &str) -> Option<Drained<S>> {
        self.span_events.harvest(app_name)
    }

    pub fn harvest_transaction_events(&self, app_name: &str) -> Option<Drained<T>> {
        self.transaction_events.harvest(app_name)
    }
}

/// The payload a trusted `tracestate` entry stands for. The caller's span is the
/// `traceparent` parent id.
fn payload_from_trace_context(
    traceparent: &W3CTraceParent,
    entry: &NrTraceStateEntry,
) -> Option<DistributedTracePayload> {
    DistributedTracePayload::builder()
        .version(MAJOR_VERSION, MINOR_VERSION)
        .parent_type(entry.parent_type)
        .account_id(Some(entry.account_id.as_str()))
        .trust_key(Some(entry.trust_key.as_str()))
        .application_id(Some(entry.application_id.as_str()))
        .guid(Some(traceparent.parent_id()))
        .trace_id(traceparent.trace_id())
        .transaction_id(entry.transaction_id.as_deref())
        .priority(entry.priority)
        .sampled(entry.sampled)
        .timestamp(entry.timestamp)
        .build()
}
