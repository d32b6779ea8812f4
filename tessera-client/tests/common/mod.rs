//! Shared setup for the access layer integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tessera_client::{AccessLayer, ResourceClient};
use tessera_test_utils::fixtures;
use tessera_test_utils::MockTransport;

pub struct Harness {
    pub mock: Arc<MockTransport>,
    pub layer: AccessLayer,
}

impl Harness {
    pub fn new() -> Self {
        let mock = Arc::new(fixtures::mock_store());
        let layer = AccessLayer::builder().transport(mock.clone()).build();
        Self { mock, layer }
    }

    pub fn handle(&self, object_type: &str, key: Option<&str>, logical_id: Option<&str>) -> ResourceClient {
        self.layer
            .resource(&fixtures::client_config(), key, logical_id, object_type)
            .expect("builtin object type")
    }
}
