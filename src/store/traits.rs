//! Unified `Database` trait covering campaigns, messages, replies and the
//! opt-out tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::campaigns::model::{
    Campaign, CampaignMessage, CampaignStatus, MessageCounts, NewCampaign, NewMessage,
};
use crate::error::DatabaseError;
use crate::optout::model::{ConfirmationTask, NewConfirmation, OptOutEntry, OptOutSource};
use crate::replies::model::{NewReply, Reply};

/// Backend-agnostic persistence interface.
///
/// Every mutation is a single statement scoped to one record, except
/// [`Database::create_campaign`] which writes the campaign and its messages
/// atomically.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    /// Insert a campaign in `pending` plus all its message rows in one
    /// transaction. Nothing is written if any insert fails.
    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        messages: &[NewMessage],
    ) -> Result<Campaign, DatabaseError>;

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError>;

    /// Campaigns newest first.
    async fn list_campaigns(&self, limit: usize) -> Result<Vec<Campaign>, DatabaseError>;

    /// Move a campaign to `status`, stamping `started_at` for `running` and
    /// `completed_at` for terminal states.
    async fn update_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Pending messages of a campaign in insertion order.
    async fn pending_messages(&self, campaign_id: &str)
    -> Result<Vec<CampaignMessage>, DatabaseError>;

    /// All messages of a campaign in insertion order.
    async fn list_messages(&self, campaign_id: &str) -> Result<Vec<CampaignMessage>, DatabaseError>;

    async fn get_message(&self, id: i64) -> Result<Option<CampaignMessage>, DatabaseError>;

    /// `pending → sent`. Returns false if the row was not pending.
    async fn mark_message_sent(&self, id: i64, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// `pending → failed` with error text. Returns false if the row was not
    /// pending.
    async fn mark_message_failed(
        &self,
        id: i64,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, DatabaseError>;

    /// Bump the retry counter and return the new value.
    async fn increment_message_retry(&self, id: i64) -> Result<i64, DatabaseError>;

    async fn message_counts(&self, campaign_id: &str) -> Result<MessageCounts, DatabaseError>;

    /// Most recent message addressed to any of `phones`, preferring the
    /// latest send time.
    async fn latest_message_for(
        &self,
        phones: &[String],
    ) -> Result<Option<CampaignMessage>, DatabaseError>;

    /// Delete pending messages of a campaign whose phone appears in the
    /// opt-out list. Returns the number removed.
    async fn delete_suppressed_pending(&self, campaign_id: &str) -> Result<u64, DatabaseError>;

    /// Count pending messages addressed to any of `phones`, optionally only
    /// within one campaign.
    async fn count_pending_for(
        &self,
        campaign_id: Option<&str>,
        phones: &[String],
    ) -> Result<i64, DatabaseError>;

    // ── Replies ─────────────────────────────────────────────────────

    async fn insert_reply(&self, reply: &NewReply) -> Result<Reply, DatabaseError>;

    /// Replies newest first, optionally restricted to one campaign.
    async fn list_replies(
        &self,
        campaign_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reply>, DatabaseError>;

    // ── Opt-out list ────────────────────────────────────────────────

    /// Insert one phone representation. Returns false when it was already
    /// present.
    async fn insert_opt_out(
        &self,
        phone: &str,
        sender_name: Option<&str>,
        reason: Option<&str>,
        source: OptOutSource,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    async fn any_opted_out(&self, phones: &[String]) -> Result<bool, DatabaseError>;

    /// Ledger rows newest first.
    async fn list_opt_outs(&self, limit: usize) -> Result<Vec<OptOutEntry>, DatabaseError>;

    async fn delete_opt_outs(&self, phones: &[String]) -> Result<u64, DatabaseError>;

    /// Ledger rows, optionally only those created at or after `since`.
    async fn count_opt_outs(&self, since: Option<DateTime<Utc>>) -> Result<i64, DatabaseError>;

    // ── Confirmation queue ──────────────────────────────────────────

    async fn insert_confirmation(
        &self,
        task: &NewConfirmation,
    ) -> Result<ConfirmationTask, DatabaseError>;

    /// Unsent tasks scheduled at or before `now`, earliest first.
    async fn due_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfirmationTask>, DatabaseError>;

    /// Returns false if the task was already sent or doesn't exist.
    async fn mark_confirmation_sent(&self, id: i64, at: DateTime<Utc>)
    -> Result<bool, DatabaseError>;

    /// Delete unsent tasks for any of `phones`.
    async fn delete_unsent_confirmations(&self, phones: &[String]) -> Result<u64, DatabaseError>;

    async fn count_pending_confirmations(&self) -> Result<i64, DatabaseError>;
}
