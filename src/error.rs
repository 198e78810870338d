//! Error types for the bulk sender.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Campaign error: {0}")]
    Campaign(#[from] CampaignError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Failure class reported by a messaging gateway.
///
/// Decided inside the gateway adapter from status codes and provider error
/// codes; core logic only ever matches on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Provider throttled us. Worth retrying after a backoff.
    RateLimited,
    /// Recipient number rejected by the provider. Permanent.
    InvalidRecipient,
    /// Credentials rejected. Permanent.
    AuthFailure,
    /// Timeout or connection failure.
    Transient,
    Unknown,
}

impl GatewayErrorKind {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

/// Gateway send failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} send failed ({kind:?}): {message}")]
pub struct GatewayError {
    pub provider: String,
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(provider: &str, kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Campaign launch and dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Campaign {0} not found")]
    NotFound(String),

    #[error("No contacts supplied")]
    NoContacts,

    #[error("Invalid contacts: {}", .0.join("; "))]
    InvalidContacts(Vec<String>),

    #[error("Campaign {id} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
