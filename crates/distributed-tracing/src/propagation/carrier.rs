// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carrier traits for reading and writing trace context headers.
//!
//! Keys are case-insensitive: injectors store them lowercased and extractors look them up
//! lowercased. A header may legitimately appear more than once (`traceparent` repeated by a
//! proxy, `tracestate` split across lines), so extractors expose every occurrence through
//! [`Extractor::get_all`].
//!
//! Adapted from the OpenTelemetry Rust project:
//! <https://github.com/open-telemetry/opentelemetry-rust/blob/main/opentelemetry/src/propagation/mod.rs>

use std::collections::HashMap;
use std::hash::BuildHasher;

use serde_json::Value;

pub trait Injector {
    /// Sets `key` (lowercased) to `value`, replacing earlier values.
    fn set(&mut self, key: &str, value: String);
}

pub trait Extractor {
    /// First value for `key`.
    fn get(&self, key: &str) -> Option<&str>;

    /// Every value for `key`, in carrier order. Empty when absent.
    fn get_all(&self, key: &str) -> Vec<&str> {
        self.get(key).into_iter().collect()
    }
}

impl<S: BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }
}

/// Multi-valued headers, as most HTTP libraries expose them.
impl<S: BuildHasher> Injector for HashMap<String, Vec<String>, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), vec![value]);
    }
}

impl<S: BuildHasher> Extractor for HashMap<String, Vec<String>, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        self.get(&key.to_lowercase())
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// JSON message attributes. Only `Value::Object` carriers hold anything; a header given as an
/// array of strings counts as repeated.
impl Injector for Value {
    fn set(&mut self, key: &str, value: String) {
        if let Value::Object(map) = self {
            map.insert(key.to_lowercase(), Value::String(value));
        }
    }
}

impl Extractor for Value {
    fn get(&self, key: &str) -> Option<&str> {
        let Value::Object(map) = self else {
            return None;
        };
        match map.get(&key.to_lowercase())? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(values) => values.first().and_then(Value::as_str),
            _ => None,
        }
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        let Value::Object(map) = self else {
            return Vec::new();
        };
        match map.get(&key.to_lowercase()) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_map_get() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        carrier.set("Traceparent", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "TRACEPARENT"),
            Some("value"),
            "case insensitive extraction"
        );
        assert_eq!(Extractor::get_all(&carrier, "traceparent"), vec!["value"]);
        assert!(Extractor::get_all(&carrier, "tracestate").is_empty());
    }

    #[test]
    fn multi_value_map_get_all() {
        let mut carrier: HashMap<String, Vec<String>> = HashMap::new();
        carrier.insert(
            "tracestate".to_string(),
            vec!["a=1".to_string(), "b=2".to_string()],
        );

        assert_eq!(Extractor::get(&carrier, "TraceState"), Some("a=1"));
        assert_eq!(Extractor::get_all(&carrier, "tracestate"), vec!["a=1", "b=2"]);

        carrier.set("TraceState", "c=3".to_string());
        assert_eq!(Extractor::get_all(&carrier, "tracestate"), vec!["c=3"]);
    }

    #[test]
    fn serde_value_get() {
        let mut carrier = Value::Object(serde_json::Map::new());
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "HEADERNAME"),
            Some("value"),
            "case insensitive extraction"
        );
        assert!(Extractor::get(&json!("not an object"), "headername").is_none());
    }

    #[test]
    fn serde_value_arrays_are_repeated_headers() {
        let carrier = json!({"traceparent": ["one", "two", 3]});
        assert_eq!(Extractor::get(&carrier, "traceparent"), Some("one"));
        assert_eq!(Extractor::get_all(&carrier, "traceparent"), vec!["one", "two"]);
    }
}
