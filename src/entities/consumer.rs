//! API consumers and their request log

use crate::impl_auditable_entity;
use crate::storage::in_memory::InMemoryStore;

impl_auditable_entity!(
    /// A known caller, identified by its API key
    Consumer,
    "api_consumer",
    "api_consumers",
    {
        #[validate(length(min = 1))]
        name: String,
        #[validate(length(min = 1))]
        api_key: String,
    }
);

impl_auditable_entity!(
    /// One request made by a consumer, recorded as `"{VERB}=>{entity}({id|all})"`
    ConsumerLog,
    "api_consumer_log",
    "api_consumer_logs",
    {
        #[validate(length(min = 1))]
        operation: String,
        #[validate(range(min = 1))]
        api_consumer_id: i64,
    },
    joins [api_consumer_id]
);

/// Name of the reserved consumer seeded with the configured admin key
pub const ADMIN_CONSUMER: &str = "admin";

impl Consumer {
    /// An in-memory consumer table with unique names and keys
    pub fn in_memory_store() -> InMemoryStore<Consumer> {
        InMemoryStore::new()
            .with_unique("name", |c: &Consumer| Some(c.name.clone()))
            .with_unique("api_key", |c: &Consumer| Some(c.api_key.clone()))
    }
}

impl ConsumerLog {
    pub fn operation_label(verb: &str, entity_type: &str, target: Option<i64>) -> String {
        match target {
            Some(id) => format!("{}=>{}({})", verb, entity_type, id),
            None => format!("{}=>{}(all)", verb, entity_type),
        }
    }
}
