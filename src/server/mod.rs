//! Server module for building HTTP servers with auto-registered routes
//!
//! This module provides a `ServerBuilder` that registers:
//! - CRUD routes for every entity type exposed by the deployment
//! - the admin-only consumer and consumer log routes
//! - health check routes

pub mod builder;
pub mod credentials;
pub mod entity_registry;
pub mod exposure;
pub mod gateway;
pub mod host;

pub use builder::ServerBuilder;
pub use credentials::CredentialResolver;
pub use entity_registry::{EntityDescriptor, EntityExposure, EntityRegistry, Registrar};
pub use gateway::{Created, EntityGateway};
pub use host::{GatewayContext, ServerHost};
