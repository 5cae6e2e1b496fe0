//! Credential resolution
//!
//! Maps the API key presented with a request to a known consumer. The
//! consumer table is seeded from configuration on first use: every configured
//! consumer and the reserved `admin` consumer are added unless a consumer with
//! the same key is already stored. Seeding runs once per process; when it
//! fails, the next request tries again.

use crate::config::CredentialsConfig;
use crate::core::auth::Operation;
use crate::core::entity::Entity;
use crate::core::error::{GatewayError, ValidationError};
use crate::core::store::{DataStore, Selection};
use crate::entities::consumer::{ADMIN_CONSUMER, Consumer};
use crate::server::gateway::WriteGuard;
use crate::storage::session::{Flush, Session};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub use crate::core::auth::Caller;

/// Actor recorded on consumers created by the bootstrap
const SYSTEM_ACTOR: &str = "system";

pub struct CredentialResolver {
    store: Arc<dyn DataStore<Consumer>>,
    seeds: Vec<(String, String)>,
    admin_api_key: String,
    header: String,
    bootstrapped: OnceCell<()>,
}

impl CredentialResolver {
    pub fn new(config: &CredentialsConfig, store: Arc<dyn DataStore<Consumer>>) -> Self {
        let mut seeds: Vec<(String, String)> = config
            .consumers
            .iter()
            .map(|c| (c.name.clone(), c.api_key.clone()))
            .collect();
        seeds.push((ADMIN_CONSUMER.to_string(), config.admin_api_key.clone()));

        Self {
            store,
            seeds,
            admin_api_key: config.admin_api_key.clone(),
            header: config.header.clone(),
            bootstrapped: OnceCell::new(),
        }
    }

    /// Name of the header carrying the API key
    pub fn header(&self) -> &str {
        &self.header
    }

    /// A guard that keeps the `admin` consumer from being changed or deleted
    pub fn reserved_consumer(&self) -> ReservedConsumer {
        ReservedConsumer {
            admin_api_key: self.admin_api_key.clone(),
        }
    }

    /// Seed the consumer table unless that already happened in this process
    pub async fn bootstrap(&self) -> Result<()> {
        self.bootstrapped
            .get_or_try_init(|| self.seed())
            .await
            .map(|_| ())
    }

    async fn seed(&self) -> Result<()> {
        let mut session = Session::new(Arc::clone(&self.store), SYSTEM_ACTOR);
        let mut added = Vec::new();

        for (name, api_key) in &self.seeds {
            let key = api_key.clone();
            let exists = Selection::matching(move |c: &Consumer| c.api_key == key);
            let consumer = Consumer::new(name.clone(), api_key.clone());

            if session
                .add_if_missing(consumer, exists, Flush::Deferred)
                .await?
            {
                added.push(name.as_str());
            }
        }

        session.flush().await?;
        tracing::info!(
            "Consumer bootstrap complete ({} added: {:?})",
            added.len(),
            added
        );
        Ok(())
    }

    /// Resolve a presented credential to its consumer
    ///
    /// A missing, empty, or unknown key is `Unauthenticated`. A store failure
    /// (during bootstrap or lookup) is reported as `Storage`.
    pub async fn resolve(&self, credential: Option<&str>) -> Result<Caller, GatewayError> {
        if let Err(e) = self.bootstrap().await {
            tracing::warn!("Consumer bootstrap failed: {:#}", e);
            return Err(GatewayError::storage(&e));
        }

        let unauthenticated = || GatewayError::Unauthenticated {
            header: self.header.clone(),
        };

        let key = credential
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(unauthenticated)?
            .to_string();

        let selection = Selection::matching(move |c: &Consumer| c.api_key == key).limit(1);
        let consumer = self
            .store
            .find_where(&selection)
            .await
            .map_err(|e| GatewayError::storage(&e))?
            .pop()
            .ok_or_else(unauthenticated)?;

        Ok(Caller {
            id: consumer.id,
            is_admin: consumer.api_key == self.admin_api_key,
            name: consumer.name,
            api_key: consumer.api_key,
        })
    }
}

/// Rejects updates and deletes of the consumer holding the admin key
#[derive(Debug, Clone)]
pub struct ReservedConsumer {
    admin_api_key: String,
}

impl WriteGuard<Consumer> for ReservedConsumer {
    fn check(&self, existing: &Consumer, operation: Operation) -> Result<(), ValidationError> {
        if existing.api_key != self.admin_api_key {
            return Ok(());
        }

        tracing::warn!(
            "Rejected {} on the reserved consumer '{}'",
            operation.verb(),
            existing.name
        );
        Err(ValidationError::ReservedRecord {
            entity_type: Consumer::resource_name_singular().to_string(),
            id: existing.id,
        })
    }
}
