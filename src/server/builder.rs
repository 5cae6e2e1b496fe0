//! ServerBuilder for fluent API to build HTTP servers

use super::credentials::CredentialResolver;
use super::entity_registry::{EntityExposure, Registrar};
use super::exposure::RestExposure;
use super::gateway::RequestLog;
use super::host::{GatewayContext, ServerHost};
use crate::config::GatewayConfig;
use crate::core::error::ConfigError;
use crate::core::module::Module;
use crate::core::store::DataStore;
use crate::entities::consumer::{Consumer, ConsumerLog};
use crate::relations::Relation;
use crate::storage::in_memory::InMemoryStore;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for creating HTTP servers with auto-registered routes
///
/// Besides the entity types of the registered modules, every host exposes
/// `api_consumers` and `api_consumer_logs`. No access rules are ever granted
/// on those, so only `admin` can reach them. The `admin` consumer itself can
/// be neither changed nor deleted.
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new(config)
///     .register_module(DummyModule::new())
///     .build()?;
/// ```
pub struct ServerBuilder {
    config: GatewayConfig,
    modules: Vec<Arc<dyn Module>>,
    consumer_store: Option<Arc<dyn DataStore<Consumer>>>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            modules: Vec::new(),
            consumer_store: None,
        }
    }

    /// Use a specific consumer store instead of a fresh in-memory one
    pub fn with_consumer_store(mut self, store: Arc<dyn DataStore<Consumer>>) -> Self {
        self.consumer_store = Some(store);
        self
    }

    /// Register a module; its entity types are exposed when the host is built
    pub fn register_module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Register an already boxed module (e.g., one selected at runtime)
    pub fn register_boxed_module(mut self, module: Box<dyn Module>) -> Self {
        self.modules.push(Arc::from(module));
        self
    }

    /// Build the transport-agnostic host
    ///
    /// Validates the configuration, runs every module's registration and
    /// freezes the access rules.
    pub fn build_host(self) -> Result<ServerHost, ConfigError> {
        self.config.validate()?;

        let consumers = self
            .consumer_store
            .unwrap_or_else(|| Arc::new(Consumer::in_memory_store()) as Arc<dyn DataStore<Consumer>>);
        let logs: Arc<dyn DataStore<ConsumerLog>> = Arc::new(InMemoryStore::<ConsumerLog>::new());
        let credentials = Arc::new(CredentialResolver::new(
            &self.config.credentials,
            Arc::clone(&consumers),
        ));

        let mut registrar = Registrar::new(&self.config);

        let consumer_logs = Relation::<Consumer, ConsumerLog>::on("api_consumer_id")?;
        registrar
            .expose(
                EntityExposure::new(Arc::clone(&consumers))
                    .guarded_by(Arc::new(credentials.reserved_consumer()))
                    .expand_children(consumer_logs, Arc::clone(&logs)),
            )?
            .expose(
                EntityExposure::new(Arc::clone(&logs))
                    .expand_parent(consumer_logs, Arc::clone(&consumers)),
            )?;

        for module in &self.modules {
            tracing::info!("Registering module '{}'", module.name());
            module.register(&mut registrar)?;
        }

        let (entity_registry, access) = registrar.finish();
        tracing::info!(
            "Exposing {} entity type(s) with {} access rule(s)",
            entity_registry.entity_types().len(),
            access.len()
        );

        let context = GatewayContext {
            access: Arc::new(access),
            credentials,
            request_log: self.config.api_logging.then(|| RequestLog::new(logs)),
            base_path: self.config.server.base_path.clone(),
            status_policy: self.config.status_codes,
        };

        Ok(ServerHost::new(self.config, context, entity_registry))
    }

    /// Build the final REST router
    pub fn build(self) -> Result<Router, ConfigError> {
        let host = Arc::new(self.build_host()?);
        Ok(RestExposure::build_router(host))
    }

    /// Serve the application on the configured address with graceful shutdown
    ///
    /// This will:
    /// - Bind to `server.bind`
    /// - Start serving requests
    /// - Handle SIGTERM and SIGINT (Ctrl+C) for graceful shutdown
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.bind_addr()?;
        let app = self.build()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
