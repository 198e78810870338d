//! Outbound messaging gateway abstraction.

pub mod twilio;

pub use twilio::TwilioGateway;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{ConfigError, GatewayError};

/// Account credentials handed to the gateway on every send.
#[derive(Debug, Clone)]
pub struct GatewayCredential {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender address, e.g. `whatsapp:+14155238886`.
    pub from: String,
}

impl GatewayCredential {
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        Ok(Self {
            account_sid: required("TWILIO_ACCOUNT_SID")?,
            auth_token: SecretString::from(required("TWILIO_AUTH_TOKEN")?),
            from: required("TWILIO_WHATSAPP_FROM")?,
        })
    }
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider message id (Twilio SID).
    pub provider_id: String,
    pub status: String,
}

/// Sends one message. Implementations classify failures into a
/// [`crate::error::GatewayErrorKind`]; callers never inspect error text.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(
        &self,
        to: &str,
        body: &str,
        credential: &GatewayCredential,
    ) -> Result<SendReceipt, GatewayError>;
}
