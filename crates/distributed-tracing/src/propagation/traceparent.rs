// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! W3C `traceparent` header.
//!
//! ```text
//! traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//!              |  |                                |                |
//!              |  trace id (32 hex)                parent id (16)   flags
//!              version
//! ```
//!
//! Only lowercase hex is accepted. All-zero ids are invalid, and so is version `ff`. Version
//! `00` must have exactly four fields; later versions may append more after another `-`.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::propagation::error::{Error, ErrorKind};

pub const TRACEPARENT_KEY: &str = "traceparent";

const CODEC: &str = "traceparent";
const SUPPORTED_VERSION: &str = "00";
const SAMPLED_FLAG: u8 = 0x01;

lazy_static! {
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"^([0-9a-f]{2})-([0-9a-f]{32})-([0-9a-f]{16})-([0-9a-f]{2})(-.*)?$")
            .expect("failed creating regex");
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct W3CTraceParent {
    version: String,
    trace_id: String,
    parent_id: String,
    flags: u8,
}

impl W3CTraceParent {
    /// Outbound traceparent. Shorter legacy ids are left-padded with zeros.
    #[must_use]
    pub fn new(trace_id: &str, parent_id: &str, sampled: bool) -> Self {
        Self {
            version: SUPPORTED_VERSION.to_string(),
            trace_id: format!("{:0>32}", trace_id.to_ascii_lowercase()),
            parent_id: format!("{:0>16}", parent_id.to_ascii_lowercase()),
            flags: if sampled { SAMPLED_FLAG } else { 0 },
        }
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[must_use]
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    #[must_use]
    pub fn sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG != 0
    }

    /// Parses a single header value.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let captures = TRACEPARENT_REGEX
            .captures(value.trim())
            .ok_or_else(|| Error::extract(ErrorKind::Malformed, "invalid traceparent", CODEC))?;

        let version = &captures[1];
        let trace_id = &captures[2];
        let parent_id = &captures[3];
        let flags = &captures[4];
        let tail = captures.get(5).map_or("", |m| m.as_str());

        Self::check_version(version, tail)?;

        if INVALID_SEGMENT_REGEX.is_match(trace_id) {
            return Err(Error::extract(
                ErrorKind::Malformed,
                "`0` value for trace_id is invalid",
                CODEC,
            ));
        }
        if INVALID_SEGMENT_REGEX.is_match(parent_id) {
            return Err(Error::extract(
                ErrorKind::Malformed,
                "`0` value for parent_id is invalid",
                CODEC,
            ));
        }

        let flags = u8::from_str_radix(flags, 16)
            .map_err(|_| Error::extract(ErrorKind::Malformed, "invalid trace flags", CODEC))?;

        Ok(Self {
            version: version.to_string(),
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            flags,
        })
    }

    /// Parses every occurrence of the header. Repeated values are only accepted when they are
    /// byte-identical.
    pub fn parse_headers(values: &[&str]) -> Result<Self, Error> {
        let Some((first, rest)) = values.split_first() else {
            return Err(Error::extract(ErrorKind::Missing, "no traceparent", CODEC));
        };
        if rest.iter().any(|value| value != first) {
            return Err(Error::extract(
                ErrorKind::Malformed,
                "multiple differing traceparent headers",
                CODEC,
            ));
        }
        Self::parse(first)
    }

    fn check_version(version: &str, tail: &str) -> Result<(), Error> {
        match version {
            "ff" => Err(Error::extract(
                ErrorKind::Unsupported,
                "`ff` is an invalid traceparent version",
                CODEC,
            )),
            SUPPORTED_VERSION if !tail.is_empty() => Err(Error::extract(
                ErrorKind::Malformed,
                "traceparent with version `00` should contain only 4 values delimited by `-`",
                CODEC,
            )),
            SUPPORTED_VERSION => Ok(()),
            _ => {
                debug!("Unsupported traceparent version {version}, still attempting to parse");
                Ok(())
            }
        }
    }
}

impl fmt::Display for W3CTraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:02x}",
            self.version, self.trace_id, self.parent_id, self.flags
        )
    }
}
