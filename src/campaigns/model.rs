//! Campaign and per-message records.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Campaign lifecycle: `pending → running → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown campaign status: {}", s)),
        }
    }
}

/// Message lifecycle: `pending → {sent, failed}`.
///
/// `Delivered` exists for the stored schema; nothing in the dispatch path
/// produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown message status: {}", s)),
        }
    }
}

/// A contact as handed over by the ingestion side.
///
/// `phone` and `name` are required; every other spreadsheet column lands in
/// `fields` and is available to the template as `{column}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl Contact {
    pub fn new(phone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Substitution map for the personalizer. `phone` and `name` win over
    /// extra fields with the same key.
    pub fn template_values(&self) -> HashMap<String, String> {
        let mut values: HashMap<String, String> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        values.insert("phone".to_string(), self.phone.clone());
        values.insert("name".to_string(), self.name.clone());
        values
    }
}

/// A persisted campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub message_template: String,
    pub total_contacts: i64,
    /// Seconds to wait between consecutive sends.
    pub rate_limit_secs: i64,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data needed to create a campaign row.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub id: String,
    pub name: String,
    pub message_template: String,
    pub rate_limit_secs: i64,
}

/// One outbound message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMessage {
    /// Autoincrement id; ascending id is send order.
    pub id: i64,
    pub campaign_id: String,
    pub phone_number: String,
    pub name: String,
    pub message_content: String,
    pub status: MessageStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

/// A message row ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub phone_number: String,
    pub name: String,
    pub message_content: String,
}

/// Message counts per status for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
}

impl MessageCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.delivered + self.failed
    }
}

/// Campaign plus its message breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStats {
    pub campaign: Campaign,
    pub counts: MessageCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            CampaignStatus::Pending,
            CampaignStatus::Running,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<CampaignStatus>().unwrap(), s);
        }
        assert!("paused".parse::<CampaignStatus>().is_err());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
    }

    #[test]
    fn contact_template_values_prefer_required_fields() {
        let contact = Contact::new("+254712345678", "Alice")
            .with_field("company", "Acme")
            .with_field("name", "shadowed");
        let values = contact.template_values();
        assert_eq!(values["name"], "Alice");
        assert_eq!(values["company"], "Acme");
        assert_eq!(values["phone"], "+254712345678");
    }

    #[test]
    fn contact_deserializes_extra_columns() {
        let contact: Contact = serde_json::from_str(
            r#"{"phone": "0712345678", "name": "Bob", "city": "Nairobi", "tier": "gold"}"#,
        )
        .unwrap();
        assert_eq!(contact.name, "Bob");
        assert_eq!(contact.fields.get("city").map(String::as_str), Some("Nairobi"));
        assert_eq!(contact.fields.len(), 2);
    }

    #[test]
    fn counts_total() {
        let counts = MessageCounts {
            pending: 1,
            sent: 2,
            delivered: 0,
            failed: 3,
        };
        assert_eq!(counts.total(), 6);
    }
}
