//! Shared fixtures for the HTTP integration tests

#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use gateway::config::GatewayConfig;
use gateway::core::error::StatusPolicy;
use gateway::core::store::DataStore;
use gateway::deployments::dummy::{DummyModule, Job};
use gateway::server::ServerBuilder;
use std::sync::Arc;

pub const ADMIN_KEY: &str = "admin-key-0001";
pub const DUMMY_KEY: &str = "dummy-key-0001";
pub const UNLISTED_KEY: &str = "nobody-key-0001";

pub fn config() -> GatewayConfig {
    GatewayConfig::new("dummy", ADMIN_KEY).with_consumer("dummy", DUMMY_KEY)
}

/// A server for the sample deployment, with direct access to its job store
pub struct Harness {
    pub server: TestServer,
    pub jobs: Arc<dyn DataStore<Job>>,
}

pub fn harness_with(config: GatewayConfig) -> Harness {
    let module = DummyModule::new();
    let jobs = module.jobs();

    let app = ServerBuilder::new(config)
        .register_module(module)
        .build()
        .expect("Failed to build app");
    let server = TestServer::try_new(app).expect("Failed to create test server");

    Harness { server, jobs }
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn legacy_harness() -> Harness {
    let mut config = config();
    config.status_codes = StatusPolicy::Legacy;
    harness_with(config)
}

pub fn logging_harness() -> Harness {
    let mut config = config();
    config.api_logging = true;
    harness_with(config)
}

/// The credential header carrying `key`
pub fn api_key(key: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("api-key"),
        HeaderValue::from_str(key).expect("valid header value"),
    )
}
