//! Entity registration and auto-generated CRUD routes
//!
//! Deployments describe what they expose with [`EntityExposure`]s and hand
//! them to a [`Registrar`]. The registrar records access rules and keeps one
//! [`EntityDescriptor`] per exposed type; routes are built from the
//! descriptors once the shared [`GatewayContext`] exists.

use crate::config::GatewayConfig;
use crate::core::auth::{Access, AccessRegistry, AccessRegistryBuilder};
use crate::core::entity::Entity;
use crate::core::error::ConfigError;
use crate::core::store::DataStore;
use crate::relations::{ChildrenExpansion, Expansion, ParentExpansion, Relation};
use crate::server::exposure::rest::entity_routes;
use crate::server::gateway::{EntityGateway, ExpansionMap, WriteGuard};
use crate::server::host::GatewayContext;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait that describes how to build routes for an entity
pub trait EntityDescriptor: Send + Sync {
    /// The entity type name (singular, e.g., "job")
    fn entity_type(&self) -> &str;

    /// The plural form used in URLs (e.g., "jobs")
    fn plural(&self) -> &str;

    /// Names accepted by the `expand` query parameter
    fn expansions(&self) -> Vec<String>;

    /// Build the CRUD routes for this entity, relative to the base path:
    /// - GET/POST /{plural}
    /// - GET/PATCH/DELETE /{plural}/{id}
    fn build_routes(&self, ctx: &GatewayContext) -> Router;
}

/// Registry for all exposed entity types
#[derive(Default)]
pub struct EntityRegistry {
    descriptors: HashMap<String, Box<dyn EntityDescriptor>>,
}

impl EntityRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Register an entity descriptor, keyed by its entity type
    pub fn register(&mut self, descriptor: Box<dyn EntityDescriptor>) -> Result<(), ConfigError> {
        let entity_type = descriptor.entity_type().to_string();
        if self.descriptors.contains_key(&entity_type) {
            return Err(ConfigError::DuplicateEntity { entity_type });
        }
        self.descriptors.insert(entity_type, descriptor);
        Ok(())
    }

    /// Build a router with the routes of every registered entity
    pub fn build_routes(&self, ctx: &GatewayContext) -> Router {
        let mut router = Router::new();

        for descriptor in self.descriptors.values() {
            router = router.merge(descriptor.build_routes(ctx));
        }

        router
    }

    /// Get all registered entity types, sorted
    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.descriptors.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn descriptor(&self, entity_type: &str) -> Option<&dyn EntityDescriptor> {
        self.descriptors.get(entity_type).map(|d| d.as_ref())
    }
}

/// What a deployment exposes for one entity type: its store, the access
/// rules per consumer key, and the relationship expansions
///
/// ```rust,ignore
/// let exposure = EntityExposure::new(jobs)
///     .grant(registrar.consumer_key("dummy")?, Access::INSERT_READ)
///     .expand_children(Relation::<Job, JobResult>::on("job_id")?, results);
/// registrar.expose(exposure)?;
/// ```
pub struct EntityExposure<T: Entity> {
    store: Arc<dyn DataStore<T>>,
    grants: Vec<(String, Access)>,
    expansions: Vec<Arc<dyn Expansion<T>>>,
    guard: Option<Arc<dyn WriteGuard<T>>>,
}

impl<T: Entity> EntityExposure<T> {
    pub fn new(store: Arc<dyn DataStore<T>>) -> Self {
        Self {
            store,
            grants: Vec::new(),
            expansions: Vec::new(),
            guard: None,
        }
    }

    /// Let `guard` veto updates and deletes of individual records
    pub fn guarded_by(mut self, guard: Arc<dyn WriteGuard<T>>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Grant `access` to the consumer holding `api_key`
    pub fn grant(mut self, api_key: impl Into<String>, access: Access) -> Self {
        self.grants.push((api_key.into(), access));
        self
    }

    /// Offer the children of each record under `C`'s plural name
    pub fn expand_children<C: Entity>(
        self,
        relation: Relation<T, C>,
        store: Arc<dyn DataStore<C>>,
    ) -> Self {
        self.with_expansion(Arc::new(ChildrenExpansion::new(relation, store)))
    }

    /// Offer the parent of each record under `P`'s singular name
    pub fn expand_parent<P: Entity>(
        self,
        relation: Relation<P, T>,
        store: Arc<dyn DataStore<P>>,
    ) -> Self {
        self.with_expansion(Arc::new(ParentExpansion::new(relation, store)))
    }

    pub fn with_expansion(mut self, expansion: Arc<dyn Expansion<T>>) -> Self {
        self.expansions.push(expansion);
        self
    }
}

/// Descriptor of one exposed entity type
struct ExposedEntity<T: Entity> {
    store: Arc<dyn DataStore<T>>,
    expansions: ExpansionMap<T>,
    guard: Option<Arc<dyn WriteGuard<T>>>,
}

impl<T: Entity> EntityDescriptor for ExposedEntity<T> {
    fn entity_type(&self) -> &str {
        T::resource_name_singular()
    }

    fn plural(&self) -> &str {
        T::resource_name()
    }

    fn expansions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.expansions.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn build_routes(&self, ctx: &GatewayContext) -> Router {
        let gateway = EntityGateway::new(
            ctx.clone(),
            Arc::clone(&self.store),
            self.expansions.clone(),
        );
        let gateway = match &self.guard {
            Some(guard) => gateway.with_guard(Arc::clone(guard)),
            None => gateway,
        };
        entity_routes(gateway)
    }
}

/// Collects the exposures and access rules of the registered deployments
pub struct Registrar<'a> {
    config: &'a GatewayConfig,
    entities: EntityRegistry,
    access: AccessRegistryBuilder,
}

impl<'a> Registrar<'a> {
    pub fn new(config: &'a GatewayConfig) -> Self {
        Self {
            config,
            entities: EntityRegistry::new(),
            access: AccessRegistryBuilder::new(),
        }
    }

    /// The configured API key of a consumer, by name
    pub fn consumer_key(&self, name: &str) -> Result<String, ConfigError> {
        self.config.consumer_key(name).map(str::to_string)
    }

    /// Expose an entity type with its access rules and expansions
    pub fn expose<T: Entity>(&mut self, exposure: EntityExposure<T>) -> Result<&mut Self, ConfigError> {
        let entity_type = T::resource_name_singular();

        let mut expansions: ExpansionMap<T> = HashMap::new();
        for expansion in exposure.expansions {
            let name = expansion.name().to_string();
            if expansions.contains_key(&name) {
                return Err(ConfigError::DuplicateExpansion {
                    entity_type: entity_type.to_string(),
                    name,
                });
            }
            expansions.insert(name, expansion);
        }

        self.entities.register(Box::new(ExposedEntity {
            store: exposure.store,
            expansions,
            guard: exposure.guard,
        }))?;

        for (api_key, access) in &exposure.grants {
            self.access.grant(entity_type, api_key, *access)?;
        }

        tracing::debug!(
            "Exposed {} with {} access rule(s)",
            T::resource_name(),
            exposure.grants.len()
        );
        Ok(self)
    }

    /// Freeze everything collected so far
    pub fn finish(self) -> (EntityRegistry, AccessRegistry) {
        (self.entities, self.access.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::in_memory::InMemoryStore;

    crate::impl_auditable_entity!(Order, "order", "orders", {
        label: String,
    });

    crate::impl_auditable_entity!(Line, "line", "lines", {
        order_id: i64,
    }, joins [order_id]);

    fn config() -> GatewayConfig {
        GatewayConfig::new("test", "admin-key-0001").with_consumer("shop", "shop-key-0001")
    }

    #[test]
    fn test_expose_registers_rules_and_descriptor() {
        let config = config();
        let mut registrar = Registrar::new(&config);
        let orders: Arc<dyn DataStore<Order>> = Arc::new(InMemoryStore::<Order>::new());
        let lines: Arc<dyn DataStore<Line>> = Arc::new(InMemoryStore::<Line>::new());
        let key = registrar.consumer_key("shop").unwrap();

        registrar
            .expose(
                EntityExposure::new(Arc::clone(&orders))
                    .grant(key.clone(), Access::FULL)
                    .expand_children(Relation::on("order_id").unwrap(), Arc::clone(&lines)),
            )
            .unwrap()
            .expose(
                EntityExposure::new(lines)
                    .grant(key, Access::READ)
                    .expand_parent(Relation::<Order, Line>::on("order_id").unwrap(), orders),
            )
            .unwrap();

        let (entities, access) = registrar.finish();
        assert_eq!(entities.entity_types(), vec!["line", "order"]);
        assert_eq!(entities.descriptor("order").unwrap().plural(), "orders");
        assert_eq!(entities.descriptor("order").unwrap().expansions(), vec!["lines"]);
        assert_eq!(entities.descriptor("line").unwrap().expansions(), vec!["order"]);
        assert_eq!(access.rule("order", "shop-key-0001"), Access::FULL);
        assert_eq!(access.rule("line", "shop-key-0001"), Access::READ);
    }

    #[test]
    fn test_duplicate_entity_is_rejected() {
        let config = config();
        let mut registrar = Registrar::new(&config);
        let orders: Arc<dyn DataStore<Order>> = Arc::new(InMemoryStore::<Order>::new());

        registrar
            .expose(EntityExposure::new(Arc::clone(&orders)))
            .unwrap();
        assert!(matches!(
            registrar.expose(EntityExposure::new(orders)),
            Err(ConfigError::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn test_duplicate_expansion_is_rejected() {
        let config = config();
        let mut registrar = Registrar::new(&config);
        let orders: Arc<dyn DataStore<Order>> = Arc::new(InMemoryStore::<Order>::new());
        let lines: Arc<dyn DataStore<Line>> = Arc::new(InMemoryStore::<Line>::new());
        let relation = Relation::<Order, Line>::on("order_id").unwrap();

        let exposure = EntityExposure::new(orders)
            .expand_children(relation, Arc::clone(&lines))
            .expand_children(relation, lines);
        assert!(matches!(
            registrar.expose(exposure),
            Err(ConfigError::DuplicateExpansion { .. })
        ));
    }

    #[test]
    fn test_unknown_consumer_name() {
        let config = config();
        let registrar = Registrar::new(&config);
        assert!(matches!(
            registrar.consumer_key("nobody"),
            Err(ConfigError::UnknownConsumer { .. })
        ));
    }
}
