//! Configuration types.
//!
//! Every struct has sensible defaults and a `from_env()` constructor that
//! overrides individual fields from environment variables.

use std::time::Duration;

use crate::phone::NumberingPlan;

/// Default business name used in auto-responses.
pub const DEFAULT_BUSINESS_NAME: &str = "our team";

/// Service-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path of the libSQL database file.
    pub db_path: String,
    /// HTTP port for the webhook / API server.
    pub port: u16,
    /// Business name quoted in auto-responses and confirmations.
    pub business_name: String,
    /// How often the confirmation dispatcher polls the queue.
    pub confirmation_poll_interval: Duration,
    pub numbering_plan: NumberingPlan,
    pub dispatch: DispatchConfig,
    pub classifier: ClassifierConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/bulk-sender.db".to_string(),
            port: 8080,
            business_name: DEFAULT_BUSINESS_NAME.to_string(),
            confirmation_poll_interval: Duration::from_secs(30),
            numbering_plan: NumberingPlan::default(),
            dispatch: DispatchConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("BULK_SENDER_DB_PATH").unwrap_or(defaults.db_path),
            port: env_parse("BULK_SENDER_PORT").unwrap_or(defaults.port),
            business_name: std::env::var("BULK_SENDER_BUSINESS_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.business_name),
            confirmation_poll_interval: env_secs("BULK_SENDER_CONFIRMATION_POLL_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.confirmation_poll_interval),
            numbering_plan: NumberingPlan::from_env(),
            dispatch: DispatchConfig::from_env(),
            classifier: ClassifierConfig::from_env(),
        }
    }
}

/// Campaign dispatch tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Delay between consecutive sends when a campaign doesn't specify one.
    pub default_delay: Duration,
    /// Coarse retries of a whole campaign run after an unexpected failure.
    pub campaign_max_retries: u32,
    /// Wait before a coarse campaign retry.
    pub campaign_retry_cooldown: Duration,
    /// Rate-limit retries for a single message.
    pub message_max_retries: u32,
    /// Base for the per-message exponential backoff (`2^attempt * base`).
    pub message_backoff_base: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(2),
            campaign_max_retries: 3,
            campaign_retry_cooldown: Duration::from_secs(60),
            message_max_retries: 5,
            message_backoff_base: Duration::from_secs(60),
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_delay: env_secs("DISPATCH_DELAY_SECS").unwrap_or(defaults.default_delay),
            campaign_max_retries: env_parse("DISPATCH_CAMPAIGN_MAX_RETRIES")
                .unwrap_or(defaults.campaign_max_retries),
            campaign_retry_cooldown: env_secs("DISPATCH_CAMPAIGN_RETRY_COOLDOWN_SECS")
                .unwrap_or(defaults.campaign_retry_cooldown),
            message_max_retries: env_parse("DISPATCH_MESSAGE_MAX_RETRIES")
                .unwrap_or(defaults.message_max_retries),
            message_backoff_base: env_secs("DISPATCH_MESSAGE_BACKOFF_SECS")
                .unwrap_or(defaults.message_backoff_base),
        }
    }
}

/// Reply classifier tuning.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Extra attempts when the model returns unparseable output.
    pub malformed_retries: u32,
    /// Fixed wait before re-asking after malformed output.
    pub malformed_retry_delay: Duration,
    /// Wait before the single retry after a rate-limit / quota error.
    pub rate_limit_backoff: Duration,
    /// Consecutive failures that open the circuit breaker.
    pub breaker_threshold: u32,
    /// How long an open breaker bypasses the model.
    pub breaker_cooldown: Duration,
    /// Confidence reported by the keyword fallback.
    pub fallback_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            malformed_retries: 2,
            malformed_retry_delay: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(30),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(300),
            fallback_confidence: 0.6,
        }
    }
}

impl ClassifierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            malformed_retries: env_parse("CLASSIFIER_MALFORMED_RETRIES")
                .unwrap_or(defaults.malformed_retries),
            malformed_retry_delay: env_secs("CLASSIFIER_MALFORMED_RETRY_DELAY_SECS")
                .unwrap_or(defaults.malformed_retry_delay),
            rate_limit_backoff: env_secs("CLASSIFIER_RATE_LIMIT_BACKOFF_SECS")
                .unwrap_or(defaults.rate_limit_backoff),
            breaker_threshold: env_parse("CLASSIFIER_BREAKER_THRESHOLD")
                .unwrap_or(defaults.breaker_threshold),
            breaker_cooldown: env_secs("CLASSIFIER_BREAKER_COOLDOWN_SECS")
                .unwrap_or(defaults.breaker_cooldown),
            fallback_confidence: env_parse::<f32>("CLASSIFIER_FALLBACK_CONFIDENCE")
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(defaults.fallback_confidence),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
