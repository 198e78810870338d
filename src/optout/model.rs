//! Opt-out ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a suppression request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptOutSource {
    Reply,
    Manual,
}

impl OptOutSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for OptOutSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reply" => Ok(Self::Reply),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown opt-out source: {}", s)),
        }
    }
}

/// One suppressed phone representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptOutEntry {
    pub phone_number: String,
    pub sender_name: Option<String>,
    pub opted_out_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub source: OptOutSource,
}

/// A queued opt-out confirmation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationTask {
    pub id: i64,
    pub phone_number: String,
    pub sender_name: Option<String>,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A confirmation ready to enqueue.
#[derive(Debug, Clone)]
pub struct NewConfirmation {
    pub phone_number: String,
    pub sender_name: Option<String>,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
}

/// Ledger summary for the analytics side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptOutAnalytics {
    /// Ledger rows, one per stored variation.
    pub total_opt_outs: i64,
    pub recent_opt_outs_24h: i64,
    pub pending_confirmations: i64,
}
