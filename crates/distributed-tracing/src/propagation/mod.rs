// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace context propagation across process boundaries.
//!
//! Two wire formats are spoken:
//! - **newrelic**: the compact JSON payload, base64 encoded in the `newrelic` header
//! - **W3C Trace Context**: `traceparent` plus `tracestate`, where our own state lives in the
//!   `{trust_key}@nr` entry
//!
//! # Trace Context Flow
//!
//! ```text
//! Inbound headers
//!   ↓
//! Extract (traceparent/tracestate first, newrelic otherwise)
//!   ↓
//! SpanProxy (set-once inbound payload, trace id, transport)
//!   ↓
//! Sample (inbound priority or a fresh local decision)
//!   ↓
//! Inject (traceparent, tracestate, newrelic)
//!   ↓
//! Outbound headers
//! ```
//!
//! Header names are matched case-insensitively by the carriers; keys are always written in
//! lowercase.

pub mod carrier;
pub mod error;
pub mod newrelic;
pub mod traceparent;
pub mod tracestate;

pub use carrier::{Extractor, Injector};
pub use error::{Error, ErrorKind};
pub use newrelic::NEWRELIC_HEADER;
pub use traceparent::{W3CTraceParent, TRACEPARENT_KEY};
pub use tracestate::{NrTraceStateEntry, W3CTraceState, TRACESTATE_KEY};
