//! Entity definitions shipped with the gateway
//!
//! Deployment-specific entities live with their deployment under
//! [`crate::deployments`]; only the consumer schema every deployment shares is
//! defined here.

pub mod consumer;
pub mod macros;

pub use consumer::{Consumer, ConsumerLog};
