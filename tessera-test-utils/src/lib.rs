//! TESSERA Test Utilities
//!
//! Shared test infrastructure for the TESSERA workspace:
//! - An in-memory REST server implementing the transport seam
//! - Proptest generators for documents and configuration
//! - Fixtures for common test setups

mod mock;

pub use mock::{Fault, MockTransport};

// Re-export core types for convenience
pub use tessera_core::{
    AccessError, AccessResult, ClientConfig, ConfirmConfig, DescriptorTable, Method, OpContext,
    RemoteObject, ResourceDescriptor, RetryConfig,
};

use serde_json::{Map, Value};
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TESSERA types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a JSON scalar.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::String),
        ]
    }

    /// Generate a nested JSON value (objects and arrays up to depth 3).
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Generate a request body for `descriptor` carrying `logical_id`.
    pub fn arb_document(
        descriptor: &ResourceDescriptor,
        logical_id: String,
    ) -> impl Strategy<Value = Map<String, Value>> {
        let logical_field = descriptor.logical_id_field.clone();
        prop::collection::btree_map("[a-z][a-z_]{0,10}", arb_json(), 0..8).prop_map(
            move |fields| {
                let mut doc: Map<String, Value> = fields.into_iter().collect();
                doc.insert(logical_field.clone(), Value::String(logical_id.clone()));
                doc
            },
        )
    }

    /// Generate a logical id.
    pub fn arb_logical_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{2,20}"
    }

    /// Generate a RetryConfig struct.
    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (0u32..10, 1u64..1000, 1000u64..60000, 1.1f32..5.0f32, any::<bool>()).prop_map(
            |(max_retries, initial_ms, max_ms, multiplier, jitter)| RetryConfig {
                max_retries,
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
                backoff_multiplier: multiplier,
                jitter,
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    pub const MOCK_HOST: &str = "mock.tessera.local";
    pub const MOCK_PORT: u16 = 8089;

    /// Fast retries without jitter, so paused-clock tests are deterministic.
    pub fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 4,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Poll every 100ms, give up after 2s.
    pub fn fast_confirm() -> ConfirmConfig {
        ConfirmConfig {
            poll_interval: Duration::from_millis(100),
            deadline: Duration::from_secs(2),
        }
    }

    /// Config pointing at the mock host with fast retry and confirmation.
    pub fn client_config() -> ClientConfig {
        ClientConfig::new(MOCK_HOST, MOCK_PORT)
            .with_base_path("services")
            .with_concurrency(4)
            .with_retry(fast_retry())
            .with_confirm(fast_confirm())
    }

    /// Mock store with every builtin collection registered.
    pub fn mock_store() -> MockTransport {
        MockTransport::for_table(&DescriptorTable::builtin())
    }

    /// A JSON object literal as a body map.
    pub fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {}", other),
        }
    }

    /// `count` roles `role-000`, `role-001`, ... keyed `00001`, `00002`, ...
    pub fn seed_roles(mock: &MockTransport, count: usize) {
        for i in 0..count {
            mock.insert(
                "access/role",
                serde_json::json!({
                    "id": format!("{:05}", i + 1),
                    "name": format!("role-{:03}", i),
                    "capabilities": ["read"],
                }),
            );
        }
    }
}
