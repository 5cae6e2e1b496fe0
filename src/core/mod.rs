//! Core module containing fundamental traits and types of the gateway

pub mod auth;
pub mod entity;
pub mod error;
pub mod module;
pub mod store;

pub use auth::{Access, AccessRegistry, Caller, Operation};
pub use entity::{AuditEnvelope, Entity, JoinField};
pub use error::{ConfigError, GatewayError, StatusPolicy};
pub use module::Module;
pub use store::{Change, DataStore, Selection};
