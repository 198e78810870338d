//! Twilio WhatsApp gateway.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GatewayError, GatewayErrorKind};
use crate::gateway::{GatewayCredential, MessageGateway, SendReceipt};

const PROVIDER: &str = "twilio";
const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Twilio error codes that mean the recipient can't be reached.
const INVALID_RECIPIENT_CODES: &[i64] = &[
    21211, // invalid 'To' number
    21408, // region not enabled
    21610, // recipient unsubscribed
    21612, // unreachable
    21614, // not a mobile number
    63003, // channel could not find the recipient
    63024, // invalid message recipient
];

/// Twilio error codes for throttling.
const RATE_LIMIT_CODES: &[i64] = &[
    14107, // SMS send rate limit exceeded
    20429, // too many requests
    63018, // rate limit exceeded for channel
];

/// Twilio error codes for credential problems.
const AUTH_CODES: &[i64] = &[20003, 20005];

pub struct TwilioGateway {
    client: reqwest::Client,
    base_url: String,
}

impl TwilioGateway {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                GatewayError::new(
                    PROVIDER,
                    GatewayErrorKind::Unknown,
                    format!("Failed to build HTTP client: {e}"),
                )
            })?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the gateway at a different host (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Decide the failure class from HTTP status and Twilio's error code.
fn classify_failure(status: u16, code: Option<i64>) -> GatewayErrorKind {
    if let Some(code) = code {
        if RATE_LIMIT_CODES.contains(&code) {
            return GatewayErrorKind::RateLimited;
        }
        if INVALID_RECIPIENT_CODES.contains(&code) {
            return GatewayErrorKind::InvalidRecipient;
        }
        if AUTH_CODES.contains(&code) {
            return GatewayErrorKind::AuthFailure;
        }
    }
    match status {
        429 => GatewayErrorKind::RateLimited,
        401 | 403 => GatewayErrorKind::AuthFailure,
        500..=599 => GatewayErrorKind::Transient,
        _ => GatewayErrorKind::Unknown,
    }
}

fn transport_address(phone: &str) -> String {
    if phone.starts_with(WHATSAPP_PREFIX) {
        phone.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{phone}")
    }
}

#[async_trait]
impl MessageGateway for TwilioGateway {
    async fn send(
        &self,
        to: &str,
        body: &str,
        credential: &GatewayCredential,
    ) -> Result<SendReceipt, GatewayError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, credential.account_sid
        );
        let to = transport_address(to);
        let from = transport_address(&credential.from);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &credential.account_sid,
                Some(credential.auth_token.expose_secret()),
            )
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() || e.is_connect() {
                    GatewayErrorKind::Transient
                } else {
                    GatewayErrorKind::Unknown
                };
                GatewayError::new(PROVIDER, kind, e.to_string())
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            GatewayError::new(
                PROVIDER,
                GatewayErrorKind::Transient,
                format!("Failed to read response: {e}"),
            )
        })?;

        if !status.is_success() {
            let err: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
            let kind = classify_failure(status.as_u16(), err.code);
            let message = match (err.code, err.message) {
                (Some(code), Some(msg)) => format!("{code}: {msg}"),
                (None, Some(msg)) => msg,
                _ => format!("HTTP {}", status.as_u16()),
            };
            return Err(GatewayError::new(PROVIDER, kind, message));
        }

        let resource: MessageResource = serde_json::from_str(&text).map_err(|e| {
            GatewayError::new(
                PROVIDER,
                GatewayErrorKind::Unknown,
                format!("Unexpected response body: {e}"),
            )
        })?;
        debug!(sid = %resource.sid, status = %resource.status, "Twilio accepted message");

        Ok(SendReceipt {
            provider_id: resource.sid,
            status: resource.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::extract::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use std::collections::HashMap;

    fn credential() -> GatewayCredential {
        GatewayCredential {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("token"),
            from: "+14155238886".into(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn failure_classification() {
        assert_eq!(classify_failure(429, None), GatewayErrorKind::RateLimited);
        assert_eq!(classify_failure(400, Some(63018)), GatewayErrorKind::RateLimited);
        assert_eq!(classify_failure(400, Some(21211)), GatewayErrorKind::InvalidRecipient);
        assert_eq!(classify_failure(401, Some(20003)), GatewayErrorKind::AuthFailure);
        assert_eq!(classify_failure(403, None), GatewayErrorKind::AuthFailure);
        assert_eq!(classify_failure(503, None), GatewayErrorKind::Transient);
        assert_eq!(classify_failure(400, Some(99999)), GatewayErrorKind::Unknown);
    }

    #[test]
    fn whatsapp_prefix_added_once() {
        assert_eq!(transport_address("+254712345678"), "whatsapp:+254712345678");
        assert_eq!(transport_address("whatsapp:+254712345678"), "whatsapp:+254712345678");
    }

    #[tokio::test]
    async fn sends_form_and_parses_sid() {
        let router = Router::new().route(
            "/2010-04-01/Accounts/AC123/Messages.json",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form["To"], "whatsapp:+254712345678");
                assert_eq!(form["From"], "whatsapp:+14155238886");
                (
                    StatusCode::CREATED,
                    Json(serde_json::json!({"sid": "SM1", "status": "queued", "body": form["Body"]})),
                )
            }),
        );
        let base = serve(router).await;
        let gateway = TwilioGateway::new().unwrap().with_base_url(base);

        let receipt = gateway
            .send("+254712345678", "Hi Alice", &credential())
            .await
            .unwrap();
        assert_eq!(receipt.provider_id, "SM1");
        assert_eq!(receipt.status, "queued");
    }

    #[tokio::test]
    async fn maps_provider_error_codes() {
        let router = Router::new().route(
            "/2010-04-01/Accounts/AC123/Messages.json",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "code": 21211,
                        "message": "The 'To' number is not a valid phone number.",
                        "status": 400
                    })),
                )
            }),
        );
        let base = serve(router).await;
        let gateway = TwilioGateway::new().unwrap().with_base_url(base);

        let err = gateway
            .send("+254000", "Hi", &credential())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::InvalidRecipient);
        assert!(err.message.starts_with("21211"));
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway = TwilioGateway::new()
            .unwrap()
            .with_base_url(format!("http://{addr}"));
        let err = gateway
            .send("+254712345678", "Hi", &credential())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Transient);
    }
}
