//! Module system
//!
//! A deployment is a [`Module`]: a named bundle of entity types, their stores,
//! their access rules and their relationships, registered at startup.

use crate::core::error::ConfigError;
use crate::server::entity_registry::Registrar;

/// A deployment that registers its entity types with the gateway
///
/// # Example
///
/// ```rust,ignore
/// struct Inventory {
///     items: Arc<InMemoryStore<Item>>,
/// }
///
/// impl Module for Inventory {
///     fn name(&self) -> &str {
///         "inventory"
///     }
///
///     fn register(&self, registrar: &mut Registrar<'_>) -> Result<(), ConfigError> {
///         let key = registrar.consumer_key("warehouse")?;
///         registrar.expose(EntityExposure::new(self.items.clone()).grant(key, Access::FULL))?;
///         Ok(())
///     }
/// }
/// ```
pub trait Module: Send + Sync {
    /// Unique name of the module (the `project` it is selected by)
    fn name(&self) -> &str;

    /// Expose the module's entity types
    ///
    /// Unknown consumer names, join fields, and duplicate rules are
    /// configuration errors and abort startup.
    fn register(&self, registrar: &mut Registrar<'_>) -> Result<(), ConfigError>;
}
