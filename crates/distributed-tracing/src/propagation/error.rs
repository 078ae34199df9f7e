// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while decoding or encoding trace context.
//!
//! None of these are fatal. The service turns them into "nothing received" and falls back to a
//! fresh local sampling decision. [`ErrorKind`] keeps "absent" apart from "present but
//! unusable" so callers and tests can tell the two apart.

use thiserror::Error;

/// Why a codec gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The header or a required field is absent.
    Missing,
    /// The value does not follow the format's grammar.
    Malformed,
    /// The value is well formed but uses a version we do not speak.
    Unsupported,
    /// The value comes from an account we do not trust.
    Untrusted,
}

/// Error during trace context extraction or injection.
///
/// Displayed as `"Cannot {operation} from {message}, {codec}"`, e.g.
/// `"Cannot extract from invalid traceparent, traceparent"`.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Cannot {} from {}, {}", operation, message, codec)]
pub struct Error {
    message: &'static str,
    codec: &'static str,
    operation: &'static str,
    kind: ErrorKind,
}

impl Error {
    #[must_use]
    pub fn extract(kind: ErrorKind, message: &'static str, codec: &'static str) -> Self {
        Self {
            message,
            codec,
            operation: "extract",
            kind,
        }
    }

    #[must_use]
    pub fn inject(kind: ErrorKind, message: &'static str, codec: &'static str) -> Self {
        Self {
            message,
            codec,
            operation: "inject",
            kind,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        self.message
    }

    #[must_use]
    pub fn codec(&self) -> &'static str {
        self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::extract(ErrorKind::Malformed, "invalid traceparent", "traceparent");
        assert_eq!(
            e.to_string(),
            "Cannot extract from invalid traceparent, traceparent"
        );
        assert_eq!(e.kind(), ErrorKind::Malformed);

        let e = Error::inject(ErrorKind::Missing, "no account id", "newrelic");
        assert_eq!(e.to_string(), "Cannot inject from no account id, newrelic");
        assert_eq!(e.codec(), "newrelic");
    }
}
