//! Configuration loading and validation
//!
//! ```yaml
//! project: dummy
//! server:
//!   bind: 0.0.0.0:3000
//!   base_path: /api
//! credentials:
//!   header: Api-Key
//!   admin_api_key: change-me-admin-key
//!   consumers:
//!     - name: dummy
//!       api_key: dummy-consumer-key
//!     - "reporting:reporting-consumer-key"
//! api_logging: true
//! status_codes: distinct
//! log_filter: info,gateway=debug
//! ```
//!
//! A configuration is validated as a whole when loaded; a deployment never
//! starts on a partially valid file.

use crate::core::error::{ConfigError, StatusPolicy};
use crate::entities::consumer::ADMIN_CONSUMER;
use axum::http::HeaderName;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::OnceLock;

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Name of the deployment to serve (e.g., "dummy")
    pub project: String,

    #[serde(default)]
    pub server: ServerConfig,

    pub credentials: CredentialsConfig,

    /// Record every authenticated request as a consumer log entry
    #[serde(default)]
    pub api_logging: bool,

    #[serde(default)]
    pub status_codes: StatusPolicy,

    /// Default tracing filter when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Prefix of every entity route; starts with `/`, no trailing `/`
    #[serde(default = "default_base_path")]
    pub base_path: String,

    #[serde(default)]
    pub permissive_cors: bool,
}

/// Credential transport and the consumers seeded at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Request header carrying the API key
    #[serde(default = "default_header")]
    pub header: String,

    /// Key of the reserved `admin` consumer
    pub admin_api_key: String,

    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

/// A consumer to seed, written either as a mapping or as `"name:key"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConsumer")]
pub struct ConsumerConfig {
    pub name: String,
    pub api_key: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConsumer {
    Pair(String),
    Full { name: String, api_key: String },
}

impl TryFrom<RawConsumer> for ConsumerConfig {
    type Error = String;

    fn try_from(raw: RawConsumer) -> Result<Self, Self::Error> {
        match raw {
            RawConsumer::Full { name, api_key } => Ok(Self { name, api_key }),
            RawConsumer::Pair(pair) => match pair.split_once(':') {
                Some((name, api_key)) => Ok(Self {
                    name: name.trim().to_string(),
                    api_key: api_key.trim().to_string(),
                }),
                None => Err(format!("consumer '{}' is not of the form name:key", pair)),
            },
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_base_path() -> String {
    "/api".to_string()
}

fn default_header() -> String {
    "Api-Key".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_path: default_base_path(),
            permissive_cors: false,
        }
    }
}

fn api_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._~-]{8,}$").expect("valid api key pattern"))
}

impl GatewayConfig {
    /// A minimal configuration with defaults for everything but the project
    /// and the admin key
    pub fn new(project: impl Into<String>, admin_api_key: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            server: ServerConfig::default(),
            credentials: CredentialsConfig {
                header: default_header(),
                admin_api_key: admin_api_key.into(),
                consumers: Vec::new(),
            },
            api_logging: false,
            status_codes: StatusPolicy::default(),
            log_filter: default_log_filter(),
        }
    }

    pub fn with_consumer(mut self, name: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.credentials.consumers.push(ConsumerConfig {
            name: name.into(),
            api_key: api_key.into(),
        });
        self
    }

    /// Load and validate configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load and validate configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field; the first problem found is reported
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::invalid("project", "must not be empty"));
        }

        self.bind_addr()?;

        let base = &self.server.base_path;
        if !base.starts_with('/') || (base.len() > 1 && base.ends_with('/')) {
            return Err(ConfigError::invalid(
                "server.base_path",
                format!("'{}' must start with '/' and not end with '/'", base),
            ));
        }

        HeaderName::try_from(self.credentials.header.as_str()).map_err(|e| {
            ConfigError::invalid("credentials.header", format!("'{}': {}", self.credentials.header, e))
        })?;

        let pattern = api_key_pattern();
        if !pattern.is_match(&self.credentials.admin_api_key) {
            return Err(ConfigError::invalid(
                "credentials.admin_api_key",
                "must be at least 8 characters of [A-Za-z0-9._~-]",
            ));
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::from([self.credentials.admin_api_key.as_str()]);
        for consumer in &self.credentials.consumers {
            let field = format!("credentials.consumers.{}", consumer.name);
            if consumer.name.is_empty() {
                return Err(ConfigError::invalid("credentials.consumers", "consumer name must not be empty"));
            }
            if consumer.name == ADMIN_CONSUMER {
                return Err(ConfigError::invalid(field, "'admin' is reserved"));
            }
            if !pattern.is_match(&consumer.api_key) {
                return Err(ConfigError::invalid(
                    field,
                    "api_key must be at least 8 characters of [A-Za-z0-9._~-]",
                ));
            }
            if !names.insert(consumer.name.as_str()) {
                return Err(ConfigError::invalid(field, "duplicate consumer name"));
            }
            if !keys.insert(consumer.api_key.as_str()) {
                return Err(ConfigError::invalid(field, "api_key is already in use"));
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|e| {
            ConfigError::invalid("server.bind", format!("'{}': {}", self.server.bind, e))
        })
    }

    /// The configured key of a consumer, by name
    pub fn consumer_key(&self, name: &str) -> Result<&str, ConfigError> {
        if name == ADMIN_CONSUMER {
            return Ok(&self.credentials.admin_api_key);
        }
        self.credentials
            .consumers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.api_key.as_str())
            .ok_or_else(|| ConfigError::UnknownConsumer {
                name: name.to_string(),
            })
    }
}
