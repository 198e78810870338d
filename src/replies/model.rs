//! Inbound reply records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::Category;

/// Whether a reply carried media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Text,
    Media,
}

impl ReplyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
        }
    }
}

impl std::str::FromStr for ReplyKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "media" => Ok(Self::Media),
            _ => Err(format!("Unknown reply type: {}", s)),
        }
    }
}

/// A stored inbound reply. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    pub phone_number: String,
    pub sender_name: String,
    pub message_content: String,
    pub received_at: DateTime<Utc>,
    pub campaign_id: Option<String>,
    pub original_message_id: Option<i64>,
    pub reply_type: ReplyKind,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub sentiment: Category,
    pub confidence_score: f32,
    pub is_opt_out: bool,
    pub requires_attention: bool,
}

/// Reply data ready to insert.
#[derive(Debug, Clone)]
pub struct NewReply {
    pub phone_number: String,
    pub sender_name: String,
    pub message_content: String,
    pub received_at: DateTime<Utc>,
    pub campaign_id: Option<String>,
    pub original_message_id: Option<i64>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub sentiment: Category,
    pub confidence_score: f32,
    pub is_opt_out: bool,
    pub requires_attention: bool,
}

impl NewReply {
    pub fn reply_type(&self) -> ReplyKind {
        if self.media_url.is_some() {
            ReplyKind::Media
        } else {
            ReplyKind::Text
        }
    }
}

/// Webhook payload as delivered by the messaging transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundPayload {
    /// Sender address, possibly transport-prefixed (`whatsapp:+254…`).
    pub from: String,
    pub body: String,
    pub media_count: u32,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

/// What the ingestion pipeline hands back to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    /// `None` when the reply could not be persisted.
    pub reply_id: Option<i64>,
    /// Text to send back to the sender. May be empty after an internal failure.
    pub auto_response: String,
}
