//! Server host for transport-agnostic API exposure
//!
//! The host holds everything an exposure needs to serve requests: the
//! registered entity types and the [`GatewayContext`] shared by all of their
//! gateways. It is frozen once built; nothing is registered afterwards.

use crate::config::GatewayConfig;
use crate::core::auth::AccessRegistry;
use crate::core::error::StatusPolicy;
use crate::server::credentials::CredentialResolver;
use crate::server::entity_registry::EntityRegistry;
use crate::server::gateway::RequestLog;
use std::sync::Arc;

/// State shared by every entity gateway
#[derive(Clone)]
pub struct GatewayContext {
    /// Frozen access rules
    pub access: Arc<AccessRegistry>,

    pub credentials: Arc<CredentialResolver>,

    /// Present when `api_logging` is enabled
    pub request_log: Option<RequestLog>,

    /// Prefix of every entity route (e.g., "/api")
    pub base_path: String,

    pub status_policy: StatusPolicy,
}

/// Host context containing all gateway state
///
/// # Example
///
/// ```rust,ignore
/// let host = ServerBuilder::new(config)
///     .register_module(DummyModule::new())
///     .build_host()?;
///
/// let app = RestExposure::build_router(Arc::new(host));
/// ```
pub struct ServerHost {
    /// Validated configuration the host was built from
    pub config: Arc<GatewayConfig>,

    /// Context handed to every gateway
    pub context: GatewayContext,

    /// Entity registry for CRUD routes
    pub entity_registry: EntityRegistry,
}

impl ServerHost {
    pub fn new(config: GatewayConfig, context: GatewayContext, entity_registry: EntityRegistry) -> Self {
        Self {
            config: Arc::new(config),
            context,
            entity_registry,
        }
    }

    /// Get entity types registered in the host
    pub fn entity_types(&self) -> Vec<&str> {
        self.entity_registry.entity_types()
    }

    pub fn is_ready(&self) -> bool {
        !self.entity_registry.entity_types().is_empty()
    }
}
