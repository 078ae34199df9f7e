// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compact `newrelic` header.
//!
//! ```json
//! {
//!   "v": [0, 1],
//!   "d": {
//!     "ty": "App", "ac": "12345", "tk": "67890", "ap": "51424",
//!     "id": "27856f70d3d314b7", "tr": "3221bf09aa0bcf0d", "tx": "6d3b3b0b0a0bcf0d",
//!     "pr": 1.234567, "sa": true, "ti": 1482959525577
//!   }
//! }
//! ```
//!
//! `tk` is only written when it differs from `ac`. `id` and `tx` are only written when span and
//! transaction events are enabled. On the wire the JSON is base64 encoded; inbound headers may
//! be either form.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::payload::{DistributedTracePayload, ParentType, MAJOR_VERSION};
use crate::propagation::error::{Error, ErrorKind};
use crate::sampled::Sampled;

pub const NEWRELIC_HEADER: &str = "newrelic";

const CODEC: &str = "newrelic";

#[derive(Serialize)]
struct WirePayload<'a> {
    v: [u32; 2],
    d: WireData<'a>,
}

#[derive(Serialize)]
struct WireData<'a> {
    ty: &'a str,
    ac: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tk: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ap: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    tr: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sa: Option<bool>,
    ti: u64,
}

impl<'a> From<&'a DistributedTracePayload> for WirePayload<'a> {
    fn from(payload: &'a DistributedTracePayload) -> Self {
        let (major, minor) = payload.version();
        let trust_key = payload
            .trust_key()
            .filter(|tk| *tk != payload.account_id());
        let sampled = payload.sampled();
        WirePayload {
            v: [major, minor],
            d: WireData {
                ty: payload.parent_type().as_str(),
                ac: payload.account_id(),
                tk: trust_key,
                ap: payload.application_id(),
                id: payload.guid(),
                tr: payload.trace_id(),
                tx: payload.transaction_id(),
                pr: payload.priority(),
                sa: (!sampled.is_unknown()).then(|| sampled.boolean_value()),
                ti: payload.timestamp(),
            },
        }
    }
}

/// Compact JSON text of a payload.
pub fn encode_json(payload: &DistributedTracePayload) -> Result<String, Error> {
    serde_json::to_string(&WirePayload::from(payload))
        .map_err(|_| Error::inject(ErrorKind::Malformed, "unserializable payload", CODEC))
}

/// Header value: base64 of the compact JSON.
pub fn encode(payload: &DistributedTracePayload) -> Result<String, Error> {
    encode_json(payload).map(|json| STANDARD.encode(json))
}

fn malformed(message: &'static str) -> Error {
    Error::extract(ErrorKind::Malformed, message, CODEC)
}

fn missing(message: &'static str) -> Error {
    Error::extract(ErrorKind::Missing, message, CODEC)
}

/// Decodes a header value, raw JSON or base64, and checks it against `trust_key`.
pub fn decode(header: &str, trust_key: Option<&str>) -> Result<DistributedTracePayload, Error> {
    let text = header.trim();
    if text.is_empty() {
        return Err(missing("empty payload"));
    }
    if text.starts_with('{') {
        return parse_json(text, trust_key);
    }

    let bytes = STANDARD
        .decode(text)
        .or_else(|_| URL_SAFE.decode(text))
        .map_err(|_| malformed("invalid base64 payload"))?;
    let json = String::from_utf8(bytes).map_err(|_| malformed("non UTF-8 payload"))?;
    parse_json(&json, trust_key)
}

/// Account ids and application ids are strings, but numbers are tolerated.
fn id_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses the compact JSON form.
///
/// Fails when the text is not JSON, the major version is newer than ours, `d`, `ac`, `ty`,
/// `tr` or `ti` are absent, or the payload's trust key (`tk`, else `ac`) is not ours. An empty
/// `ap` is kept as absent.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_json(text: &str, trust_key: Option<&str>) -> Result<DistributedTracePayload, Error> {
    let value: Value = serde_json::from_str(text).map_err(|_| malformed("invalid JSON"))?;

    let version = value.get("v").and_then(Value::as_array);
    let major = version
        .and_then(|v| v.first())
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("payload has no version"))?;
    let minor = version
        .and_then(|v| v.get(1))
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let major = u32::try_from(major)
        .ok()
        .filter(|major| *major <= MAJOR_VERSION)
        .ok_or_else(|| {
            Error::extract(ErrorKind::Unsupported, "unsupported payload version", CODEC)
        })?;
    let minor = u32::try_from(minor).unwrap_or(u32::MAX);

    let data = value
        .get("d")
        .and_then(Value::as_object)
        .ok_or_else(|| missing("payload has no data"))?;

    let account_id = id_field(data, "ac")
        .filter(|ac| !ac.is_empty())
        .ok_or_else(|| missing("payload has no account id"))?;
    let payload_trust_key = id_field(data, "tk").filter(|tk| !tk.is_empty());
    let effective = payload_trust_key.as_deref().unwrap_or(&account_id);
    if trust_key != Some(effective) {
        return Err(Error::extract(
            ErrorKind::Untrusted,
            "untrusted account key",
            CODEC,
        ));
    }

    let parent_type = data
        .get("ty")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("payload has no parent type"))?
        .parse::<ParentType>()
        .map_err(|_| malformed("invalid parent type"))?;
    let trace_id = data
        .get("tr")
        .and_then(Value::as_str)
        .filter(|tr| !tr.is_empty())
        .ok_or_else(|| missing("payload has no trace id"))?;
    let timestamp = data
        .get("ti")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("payload has no timestamp"))?;
    let priority = data.get("pr").and_then(Value::as_f64).map(|p| p as f32);

    DistributedTracePayload::builder()
        .version(major, minor)
        .parent_type(parent_type)
        .account_id(Some(account_id))
        .trust_key(payload_trust_key)
        .application_id(id_field(data, "ap"))
        .guid(data.get("id").and_then(Value::as_str))
        .trace_id(trace_id)
        .transaction_id(data.get("tx").and_then(Value::as_str))
        .priority(priority)
        .sampled(Sampled::from_json(data.get("sa")))
        .timestamp(timestamp)
        .build()
        .ok_or_else(|| malformed("incomplete payload"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAYLOAD: &str = r#"{
        "v": [0, 1],
        "d": {
            "ty": "App",
            "ac": "12345",
            "tk": "67890",
            "ap": "51424",
            "id": "27856f70d3d314b7",
            "tr": "3221bf09aa0bcf0d",
            "tx": "abcdefghijk",
            "pr": 0.5,
            "ti": 1482959525577
        }
    }"#;

    #[test]
    fn test_parse_payload() {
        let payload = parse_json(PAYLOAD, Some("67890")).unwrap();
        assert_eq!(payload.parent_type(), ParentType::App);
        assert_eq!(payload.account_id(), "12345");
        assert_eq!(payload.trust_key(), Some("67890"));
        assert_eq!(payload.application_id(), Some("51424"));
        assert_eq!(payload.guid(), Some("27856f70d3d314b7"));
        assert_eq!(payload.trace_id(), "3221bf09aa0bcf0d");
        assert_eq!(payload.transaction_id(), Some("abcdefghijk"));
        assert_eq!(payload.priority(), Some(0.5));
        assert_eq!(payload.sampled(), Sampled::Unknown);
        assert_eq!(payload.timestamp(), 1_482_959_525_577);
    }

    #[test]
    fn test_untrusted_payload() {
        let err = parse_json(PAYLOAD, Some("09876")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Untrusted);
        let err = parse_json(PAYLOAD, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Untrusted);
    }

    #[test]
    fn test_missing_trust_key_uses_account_id() {
        let text = json!({
            "v": [0, 2],
            "d": {"ty": "App", "ac": "accountId", "ap": "8747", "tr": "3221bf09aa0bcf0d", "pr": 0.5, "ti": 1}
        })
        .to_string();
        let payload = parse_json(&text, Some("accountId")).unwrap();
        assert_eq!(payload.trust_key(), None);
        assert_eq!(payload.effective_trust_key(), "accountId");
        assert_eq!(payload.version(), (0, 2));
        assert!(parse_json(&text, Some("trustKey")).is_err());
    }

    #[test]
    fn test_invalid_payloads() {
        let cases = [
            ("", ErrorKind::Malformed),
            ("not json", ErrorKind::Malformed),
            (r#"{"v" : [0,2]}"#, ErrorKind::Missing),
            (
                r#"{"v":[1,0],"d":{"ty":"App","ac":"1","tr":"a","ti":1}}"#,
                ErrorKind::Unsupported,
            ),
            (
                r#"{"v":[0,1],"d":{"ty":"App","tr":"a","ti":1}}"#,
                ErrorKind::Missing,
            ),
            (
                r#"{"v":[0,1],"d":{"ty":"Robot","ac":"1","tr":"a","ti":1}}"#,
                ErrorKind::Malformed,
            ),
            (
                r#"{"v":[0,1],"d":{"ty":"App","ac":"1","ti":1}}"#,
                ErrorKind::Missing,
            ),
            (r#"{"d":{"ty":"App","ac":"1","tr":"a","ti":1}}"#, ErrorKind::Missing),
        ];
        for (text, kind) in cases {
            let err = parse_json(text, Some("1")).unwrap_err();
            assert_eq!(err.kind(), kind, "{text}");
        }
    }

    #[test]
    fn test_empty_application_id_is_kept_as_absent() {
        let text = r#"{"v":[0,1],"d":{"ty":"App","ac":"1","ap":"","tr":"a","ti":1}}"#;
        let payload = parse_json(text, Some("1")).unwrap();
        assert_eq!(payload.application_id(), None);
    }

    #[test]
    fn test_trust_key_omitted_when_equal_to_account() {
        let payload = DistributedTracePayload::builder()
            .account_id(Some("accountId"))
            .trust_key(Some("accountId"))
            .trace_id("3221bf09aa0bcf0d")
            .timestamp(1)
            .build()
            .unwrap();
        let json: Value = serde_json::from_str(&encode_json(&payload).unwrap()).unwrap();
        assert!(json["d"].get("tk").is_none());

        let payload = DistributedTracePayload::builder()
            .account_id(Some("accountId"))
            .trust_key(Some("trustKey"))
            .trace_id("3221bf09aa0bcf0d")
            .timestamp(1)
            .build()
            .unwrap();
        let json: Value = serde_json::from_str(&encode_json(&payload).unwrap()).unwrap();
        assert_eq!(json["d"]["tk"], "trustKey");
        assert_eq!(json["v"], json!([0, 1]));
    }

    #[test]
    fn test_round_trip_through_base64() {
        let payload = DistributedTracePayload::builder()
            .account_id(Some("33"))
            .application_id(Some("2827902"))
            .trust_key(Some("1"))
            .guid(Some("27856f70d3d314b7"))
            .trace_id("b854df4feb2b1f06")
            .transaction_id(Some("7d3efb1b173fecfa"))
            .priority(Some(1.123_456))
            .timestamp(1_518_469_636_035)
            .build()
            .unwrap();
        let header = encode(&payload).unwrap();
        assert!(!header.starts_with('{'));

        let parsed = decode(&header, Some("1")).unwrap();
        assert_eq!(parsed.account_id(), "33");
        assert_eq!(parsed.application_id(), Some("2827902"));
        assert_eq!(parsed.guid(), Some("27856f70d3d314b7"));
        assert_eq!(parsed.trace_id(), "b854df4feb2b1f06");
        assert_eq!(parsed.transaction_id(), Some("7d3efb1b173fecfa"));
        assert!((parsed.priority().unwrap() - 1.123_456).abs() < 1e-6);
        assert_eq!(parsed.sampled(), Sampled::Yes);
        assert_eq!(parsed.timestamp(), 1_518_469_636_035);
    }

    #[test]
    fn test_decode_accepts_raw_json_and_rejects_garbage() {
        assert!(decode(PAYLOAD, Some("67890")).is_ok());
        let err = decode("!!!not-base64!!!", Some("67890")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        let err = decode("   ", Some("67890")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Missing);
    }
}
