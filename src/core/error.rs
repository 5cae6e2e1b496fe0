//! Typed error handling for the gateway
//!
//! Every failure a gateway operation can report is a [`GatewayError`]. The
//! variants follow the request taxonomy: authentication, authorization,
//! malformed targets, payload validation, missing targets, and storage
//! failures that were unwrapped to their root cause.
//!
//! # Error Categories
//!
//! - [`GatewayError`]: request-level failures, rendered as HTTP responses
//! - [`ValidationError`]: payload problems detected before any storage access
//! - [`StoreError`]: failures raised by storage backends (root causes)
//! - [`ConfigError`]: startup failures (configuration and registration)
//!
//! # Example
//!
//! ```rust,ignore
//! match gateway.update(Some(key), Some("7"), body).await {
//!     Ok(job) => println!("updated {}", job.id),
//!     Err(GatewayError::NotFound { id, .. }) => println!("job {} is gone", id),
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How authentication and authorization failures map onto HTTP status codes
///
/// `Legacy` reports rejected credentials and rules with the status class of
/// bad input, for clients built against the older mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// 401 / 403 / 400 / 404 as the failure class suggests
    #[default]
    Distinct,

    /// Unauthenticated and Forbidden become 400, a missing target id becomes 404
    Legacy,
}

/// The main error type for gateway operations
#[derive(Debug)]
pub enum GatewayError {
    /// No consumer matches the presented credential
    Unauthenticated {
        header: String,
    },

    /// The caller is known but lacks the required flag for this type and verb
    Forbidden {
        entity_type: String,
        verb: &'static str,
    },

    /// The request target carries no usable id
    MalformedId {
        verb: &'static str,
        value: Option<String>,
    },

    /// The payload failed decoding or structural validation
    Validation(ValidationError),

    /// The targeted record does not exist
    NotFound {
        entity_type: String,
        id: i64,
    },

    /// The requested expansion is not declared for this entity type
    UnknownExpansion {
        entity_type: String,
        name: String,
    },

    /// A storage failure, reduced to the message of its root cause
    Storage {
        message: String,
    },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Unauthenticated { header } => write!(
                f,
                "Auth failed. Invalid API key. Insert your API key into the HTTP header '{}'",
                header
            ),
            GatewayError::Forbidden { entity_type, verb } => {
                write!(f, "It is not allowed to access <{}> via <{}>", entity_type, verb)
            }
            GatewayError::MalformedId { verb, value: None } => write!(
                f,
                "<{}> requires a target id: <base>/<entities>/<id>",
                verb
            ),
            GatewayError::MalformedId {
                verb,
                value: Some(value),
            } => write!(f, "'{}' is not a valid id for <{}>", value, verb),
            GatewayError::Validation(e) => write!(f, "{}", e),
            GatewayError::NotFound { entity_type, id } => {
                write!(f, "No {} found for id {}", entity_type, id)
            }
            GatewayError::UnknownExpansion { entity_type, name } => {
                write!(f, "'{}' cannot be expanded on {}", name, entity_type)
            }
            GatewayError::Storage { message } => write!(f, "An error occurred: {}", message),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GatewayError {
    /// Wrap a storage failure, keeping only the message of its root cause
    pub fn storage(err: &anyhow::Error) -> Self {
        GatewayError::Storage {
            message: err.root_cause().to_string(),
        }
    }

    /// Get the HTTP status code for this error under the given policy
    pub fn status_code(&self, policy: StatusPolicy) -> StatusCode {
        match (self, policy) {
            (GatewayError::Unauthenticated { .. }, StatusPolicy::Distinct) => {
                StatusCode::UNAUTHORIZED
            }
            (GatewayError::Forbidden { .. }, StatusPolicy::Distinct) => StatusCode::FORBIDDEN,
            (GatewayError::Unauthenticated { .. }, StatusPolicy::Legacy) => {
                StatusCode::BAD_REQUEST
            }
            (GatewayError::Forbidden { .. }, StatusPolicy::Legacy) => StatusCode::BAD_REQUEST,
            (GatewayError::MalformedId { value: None, .. }, StatusPolicy::Legacy) => {
                StatusCode::NOT_FOUND
            }
            (GatewayError::MalformedId { .. }, _) => StatusCode::BAD_REQUEST,
            (GatewayError::Validation(_), _) => StatusCode::BAD_REQUEST,
            (GatewayError::NotFound { .. }, _) => StatusCode::NOT_FOUND,
            (GatewayError::UnknownExpansion { .. }, _) => StatusCode::BAD_REQUEST,
            (GatewayError::Storage { .. }, _) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated { .. } => "UNAUTHENTICATED",
            GatewayError::Forbidden { .. } => "FORBIDDEN",
            GatewayError::MalformedId { .. } => "MALFORMED_ID",
            GatewayError::Validation(e) => e.error_code(),
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::UnknownExpansion { .. } => "UNKNOWN_EXPANSION",
            GatewayError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::Forbidden { entity_type, verb } => Some(serde_json::json!({
                "entity_type": entity_type,
                "verb": verb
            })),
            GatewayError::NotFound { entity_type, id } => Some(serde_json::json!({
                "entity_type": entity_type,
                "id": id
            })),
            GatewayError::Validation(ValidationError::Fields(errors)) => {
                serde_json::to_value(errors).ok()
            }
            _ => None,
        }
    }

    /// Pair this error with a status policy so it can be rendered
    pub fn with_policy(self, policy: StatusPolicy) -> ApiError {
        ApiError {
            error: self,
            policy,
        }
    }
}

impl From<ValidationError> for GatewayError {
    fn from(err: ValidationError) -> Self {
        GatewayError::Validation(err)
    }
}

/// A [`GatewayError`] bound to the status policy of the serving host
#[derive(Debug)]
pub struct ApiError {
    pub error: GatewayError,
    pub policy: StatusPolicy,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code(self.policy);
        let body = Json(self.error.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Payload problems, always detected before the store is touched
#[derive(Debug)]
pub enum ValidationError {
    /// The body could not be decoded into the entity type
    Malformed { message: String },

    /// Field-level constraint violations
    Fields(validator::ValidationErrors),

    /// An element of a create batch already carries an id
    IdentityPreassigned { id: i64 },

    /// A create request without any element
    EmptyBatch,

    /// The targeted record may not be replaced or deleted
    ReservedRecord { entity_type: String, id: i64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Malformed { message } => write!(f, "Invalid body: {}", message),
            ValidationError::Fields(errors) => write!(f, "Validation failed: {}", errors),
            ValidationError::IdentityPreassigned { id } => write!(
                f,
                "Use <POST> for creating objects only. Do not set 'id' (got {}). Otherwise use <PATCH> for updating objects.",
                id
            ),
            ValidationError::EmptyBatch => {
                write!(f, "POST bodies must be a non-empty JSON array")
            }
            ValidationError::ReservedRecord { entity_type, id } => {
                write!(f, "{} {} is reserved and cannot be changed or deleted", entity_type, id)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::Malformed { .. } => "MALFORMED_BODY",
            ValidationError::Fields(_) => "VALIDATION_ERROR",
            ValidationError::IdentityPreassigned { .. } => "ID_NOT_ALLOWED",
            ValidationError::EmptyBatch => "EMPTY_BATCH",
            ValidationError::ReservedRecord { .. } => "RESERVED_RECORD",
        }
    }
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ValidationError::Fields(errors)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Failures raised by storage backends
///
/// Backends return these wrapped in `anyhow::Error` (usually with context);
/// the gateway reports the root cause.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value '{value}' for unique key '{key}' of {entity_type}")]
    UniqueViolation {
        entity_type: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("{entity_type} with id {id} does not exist")]
    MissingRow { entity_type: &'static str, id: i64 },

    #[error("{entity_type} insert carries preassigned id {id}")]
    PreassignedId { entity_type: &'static str, id: i64 },

    #[error("{entity_type} table lock poisoned")]
    Poisoned { entity_type: &'static str },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Startup failures: configuration loading and deployment registration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("no consumer named '{name}' is configured")]
    UnknownConsumer { name: String },

    #[error("no deployment registered for project '{project}'")]
    UnknownProject { project: String },

    #[error("{entity_type} has no join field named '{field}'")]
    UnknownJoinField { entity_type: String, field: String },

    #[error("{entity_type} is exposed more than once")]
    DuplicateEntity { entity_type: String },

    #[error("{entity_type} already has an access rule for consumer key '{api_key}'")]
    DuplicateAccessRule {
        entity_type: String,
        api_key: String,
    },

    #[error("{entity_type} declares expansion '{name}' more than once")]
    DuplicateExpansion { entity_type: String, name: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
