// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Random identifiers: 32 hex char trace ids and 16 hex char span / transaction guids.

use rand::Rng;

/// Generates a 128-bit trace id as 32 lowercase hex chars. Never all zero.
#[must_use]
pub fn generate_trace_id() -> String {
    let mut rng = rand::thread_rng();
    let id: u128 = loop {
        let candidate = rng.gen::<u128>();
        if candidate != 0 {
            break candidate;
        }
    };
    format!("{id:032x}")
}

/// Generates a 64-bit guid as 16 lowercase hex chars. Never all zero.
#[must_use]
pub fn generate_guid() -> String {
    let mut rng = rand::thread_rng();
    let id: u64 = loop {
        let candidate = rng.gen::<u64>();
        if candidate != 0 {
            break candidate;
        }
    };
    format!("{id:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_shape() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_trace_id());
    }

    #[test]
    fn test_guid_shape() {
        let id = generate_guid();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
