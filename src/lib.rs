//! # Entity Gateway
//!
//! A keyed, audit-stamping CRUD gateway over registered entity types.
//!
//! ## Features
//!
//! - **Keyed Access**: every request carries an API key; per-entity, per-key
//!   access rules decide which verbs a consumer may use
//! - **Credential Bootstrap**: configured consumers and the reserved `admin`
//!   are seeded into the consumer table on first use
//! - **Audit Stamping**: creation and modification timestamps and actors are
//!   maintained by the persistence layer, never by callers
//! - **Relationships**: parent/child expansion over declared join fields,
//!   resolved with one store query per page
//! - **Deployments**: a configured `project` selects the module whose entity
//!   types are exposed
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gateway::prelude::*;
//!
//! impl_auditable_entity!(
//!     Ticket,
//!     "ticket",
//!     "tickets",
//!     {
//!         #[validate(length(min = 1))]
//!         title: String,
//!     }
//! );
//!
//! struct Helpdesk;
//!
//! impl Module for Helpdesk {
//!     fn name(&self) -> &str {
//!         "helpdesk"
//!     }
//!
//!     fn register(&self, registrar: &mut Registrar<'_>) -> Result<(), ConfigError> {
//!         let key = registrar.consumer_key("frontdesk")?;
//!         registrar.expose(
//!             EntityExposure::<Ticket>::new(Arc::new(InMemoryStore::new()))
//!                 .grant(key, Access::INSERT_READ),
//!         )?;
//!         Ok(())
//!     }
//! }
//!
//! let config = GatewayConfig::from_yaml_file("gateway.yaml")?;
//! ServerBuilder::new(config).register_module(Helpdesk).serve().await?;
//! ```

pub mod config;
pub mod core;
pub mod deployments;
pub mod entities;
pub mod relations;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core Traits ===
    pub use crate::core::{
        auth::{Access, AccessRegistry, Caller, Operation},
        entity::{AuditEnvelope, Entity, JoinField},
        error::{ConfigError, GatewayError, StatusPolicy, ValidationError},
        module::Module,
        store::{Change, DataStore, Selection},
    };

    // === Macros ===
    pub use crate::impl_auditable_entity;

    // === Entities ===
    pub use crate::entities::{Consumer, ConsumerLog};

    // === Relations ===
    pub use crate::relations::{ChildrenExpansion, Expansion, ParentExpansion, Relation};

    // === Storage ===
    pub use crate::storage::{Flush, FlushFailure, InMemoryStore, Session};

    // === Config ===
    pub use crate::config::GatewayConfig;

    // === Server ===
    pub use crate::server::{
        EntityExposure, EntityGateway, EntityRegistry, Registrar, ServerBuilder, ServerHost,
    };

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
}
