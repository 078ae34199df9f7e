// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Distributed Tracing
//!
//! Sampling and propagation core for distributed traces.
//!
//! ## Overview
//!
//! For every unit of work flowing through a distributed call graph this crate decides whether
//! it is recorded in full detail, and carries that decision together with a stable trace and
//! parent identity across process boundaries:
//! - **Sampling**: an adaptive target-seeking sampler, a deterministic trace-id-ratio sampler,
//!   and always-on / always-off samplers, selected per structural case
//! - **Reservoirs**: fixed-capacity priority queues that keep the highest-priority events
//! - **Propagation**: the compact `newrelic` JSON payload and the W3C Trace Context
//!   `traceparent` / `tracestate` headers
//! - **Per-trace state**: [`span_proxy::SpanProxy`], the set-once record of which identity won
//!
//! ## Architecture
//!
//! - [`service`]: the [`service::DistributedTraceService`] orchestrator owning samplers and
//!   reservoirs
//! - [`samplers`]: sampling strategies and the factory building them from configuration
//! - [`reservoir`]: the bounded priority reservoir and its per-application registry
//! - [`priority`]: the overloaded priority float encoding
//! - [`payload`]: the immutable distributed trace payload
//! - [`propagation`]: wire codecs and header carriers
//! - [`config`]: environment and YAML configuration
//! - [`harvest`]: the periodic timer driving sampler period roll-over

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

/// Configuration management - YAML files, environment variables, and defaults
pub mod config;

/// Periodic harvest timer for sampler period roll-over
pub mod harvest;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Immutable distributed trace payload and its builder
pub mod payload;

/// Priority float encoding (base randomness plus granularity increment)
pub mod priority;

/// Trace context propagation codecs and carriers
pub mod propagation;

/// Fixed-capacity priority reservoirs
pub mod reservoir;

/// Tri-state sampled flag
pub mod sampled;

/// Sampling strategies
pub mod samplers;

/// Distributed trace orchestrator
pub mod service;

/// Per-trace set-once identity holder
pub mod span_proxy;

/// Random trace id and guid generation
pub mod ids;
