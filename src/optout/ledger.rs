//! Suppression ledger keyed by phone identity.
//!
//! Every operation expands the input into all its stored representations via
//! [`NumberingPlan::variations`], so rows written before normalization still
//! match.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::optout::model::{
    ConfirmationTask, NewConfirmation, OptOutAnalytics, OptOutEntry, OptOutSource,
};
use crate::phone::NumberingPlan;
use crate::store::Database;

/// Text sent once a number has been suppressed.
pub fn confirmation_message(business_name: &str) -> String {
    format!(
        "Thank you for your message. You have been removed from our messaging list. \
         You will not receive further messages from {business_name}."
    )
}

/// Opt-out list plus confirmation queue.
#[derive(Clone)]
pub struct OptOutLedger {
    db: Arc<dyn Database>,
    plan: NumberingPlan,
    business_name: String,
}

impl OptOutLedger {
    pub fn new(db: Arc<dyn Database>, plan: NumberingPlan, business_name: impl Into<String>) -> Self {
        Self {
            db,
            plan,
            business_name: business_name.into(),
        }
    }

    pub fn plan(&self) -> &NumberingPlan {
        &self.plan
    }

    pub fn confirmation_text(&self) -> String {
        confirmation_message(&self.business_name)
    }

    /// True if any representation of `phone` is suppressed.
    pub async fn is_opted_out(&self, phone: &str) -> Result<bool, DatabaseError> {
        let variations = self.plan.variations(phone);
        if variations.is_empty() {
            return Ok(false);
        }
        self.db.any_opted_out(&variations).await
    }

    /// Suppress `phone` under every representation. Repeating the call is a
    /// no-op. Returns how many new ledger rows were written.
    pub async fn mark_opted_out(
        &self,
        phone: &str,
        sender_name: Option<&str>,
        reason: Option<&str>,
        source: OptOutSource,
    ) -> Result<usize, DatabaseError> {
        let now = Utc::now();
        let mut inserted = 0;
        for variation in self.plan.variations(phone) {
            if self
                .db
                .insert_opt_out(&variation, sender_name, reason, source, now)
                .await?
            {
                inserted += 1;
            }
        }

        if inserted > 0 {
            info!(phone = %phone, source = source.as_str(), rows = inserted, "Phone opted out");
        } else {
            debug!(phone = %phone, "Phone already opted out");
        }
        Ok(inserted)
    }

    /// Queue a confirmation to `phone` at `now + delay`.
    pub async fn schedule_confirmation(
        &self,
        phone: &str,
        sender_name: Option<&str>,
        delay: Duration,
    ) -> Result<ConfirmationTask, DatabaseError> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let phone_number = self
            .plan
            .normalize(phone)
            .unwrap_or_else(|| self.plan.strip_transport(phone).to_string());
        let task = NewConfirmation {
            phone_number,
            sender_name: sender_name.map(String::from),
            message: self.confirmation_text(),
            scheduled_time: Utc::now() + delay,
        };
        let task = self.db.insert_confirmation(&task).await?;
        debug!(task_id = task.id, phone = %task.phone_number, "Confirmation scheduled");
        Ok(task)
    }

    /// Unsent confirmations scheduled at or before `now`, earliest first.
    pub async fn due_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfirmationTask>, DatabaseError> {
        self.db.due_confirmations(now).await
    }

    /// Returns false if the task was already sent.
    pub async fn mark_confirmation_sent(&self, id: i64) -> Result<bool, DatabaseError> {
        self.db.mark_confirmation_sent(id, Utc::now()).await
    }

    /// Drop pending messages of `campaign_id` addressed to suppressed numbers.
    pub async fn sweep_campaign(&self, campaign_id: &str) -> Result<u64, DatabaseError> {
        let removed = self.db.delete_suppressed_pending(campaign_id).await?;
        if removed > 0 {
            info!(campaign_id = %campaign_id, removed, "Swept opted-out contacts from campaign");
        }
        Ok(removed)
    }

    /// Pending messages still addressed to any form of `phone`, across all
    /// campaigns or within one.
    pub async fn queued_messages_for(
        &self,
        phone: &str,
        campaign_id: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let variations = self.plan.variations(phone);
        if variations.is_empty() {
            return Ok(0);
        }
        self.db.count_pending_for(campaign_id, &variations).await
    }

    /// Undo an opt-out. Also cancels any confirmation still waiting to go out.
    pub async fn remove_opt_out(&self, phone: &str) -> Result<u64, DatabaseError> {
        let variations = self.plan.variations(phone);
        if variations.is_empty() {
            return Ok(0);
        }
        let removed = self.db.delete_opt_outs(&variations).await?;
        let cancelled = self.db.delete_unsent_confirmations(&variations).await?;
        info!(phone = %phone, removed, cancelled, "Opt-out removed");
        Ok(removed)
    }

    /// Ledger rows newest first, one per stored representation.
    pub async fn entries(&self, limit: usize) -> Result<Vec<OptOutEntry>, DatabaseError> {
        self.db.list_opt_outs(limit).await
    }

    pub async fn analytics(&self) -> Result<OptOutAnalytics, DatabaseError> {
        let since = Utc::now() - chrono::Duration::hours(24);
        Ok(OptOutAnalytics {
            total_opt_outs: self.db.count_opt_outs(None).await?,
            recent_opt_outs_24h: self.db.count_opt_outs(Some(since)).await?,
            pending_confirmations: self.db.count_pending_confirmations().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::model::{NewCampaign, NewMessage};
    use crate::store::LibSqlBackend;

    async fn ledger() -> (OptOutLedger, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        (
            OptOutLedger::new(Arc::clone(&db), NumberingPlan::default(), "Acme"),
            db,
        )
    }

    fn message(phone: &str) -> NewMessage {
        NewMessage {
            phone_number: phone.into(),
            name: "N".into(),
            message_content: "Hello".into(),
        }
    }

    #[tokio::test]
    async fn opt_out_matches_every_form() {
        let (ledger, _) = ledger().await;
        assert!(!ledger.is_opted_out("0712345678").await.unwrap());

        ledger
            .mark_opted_out("whatsapp:+254712345678", Some("Alice"), Some("STOP"), OptOutSource::Reply)
            .await
            .unwrap();

        for form in ["0712345678", "712345678", "254712345678", "+254712345678"] {
            assert!(ledger.is_opted_out(form).await.unwrap(), "{form}");
        }
        assert!(!ledger.is_opted_out("0722000000").await.unwrap());

        let entries = ledger.entries(50).await.unwrap();
        assert!(entries.iter().any(|e| e.phone_number == "+254712345678"));
        assert!(entries.iter().all(|e| e.source == OptOutSource::Reply));
        assert_eq!(entries[0].reason.as_deref(), Some("STOP"));
        assert_eq!(entries[0].sender_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn marking_twice_is_idempotent() {
        let (ledger, _) = ledger().await;
        let first = ledger
            .mark_opted_out("0712345678", None, None, OptOutSource::Manual)
            .await
            .unwrap();
        let second = ledger
            .mark_opted_out("+254712345678", None, None, OptOutSource::Manual)
            .await
            .unwrap();
        assert_eq!(first, NumberingPlan::default().variations("0712345678").len());
        assert_eq!(second, 0);

        let stats = ledger.analytics().await.unwrap();
        assert_eq!(stats.total_opt_outs, first as i64);
        assert_eq!(stats.recent_opt_outs_24h, first as i64);
    }

    #[tokio::test]
    async fn confirmations_due_in_order_and_sent_once() {
        let (ledger, _) = ledger().await;
        let later = ledger
            .schedule_confirmation("0711111111", None, Duration::from_secs(3600))
            .await
            .unwrap();
        let now_a = ledger
            .schedule_confirmation("0712345678", Some("Alice"), Duration::ZERO)
            .await
            .unwrap();
        let now_b = ledger
            .schedule_confirmation("0722222222", None, Duration::ZERO)
            .await
            .unwrap();
        assert!(now_a.message.contains("from Acme."));
        assert_eq!(now_a.phone_number, "+254712345678");

        let due = ledger.due_confirmations(Utc::now()).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![now_a.id, now_b.id]);
        assert!(!ids.contains(&later.id));

        assert!(ledger.mark_confirmation_sent(now_a.id).await.unwrap());
        assert!(!ledger.mark_confirmation_sent(now_a.id).await.unwrap());
        let due = ledger.due_confirmations(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, now_b.id);
        assert_eq!(ledger.analytics().await.unwrap().pending_confirmations, 2);
    }

    #[tokio::test]
    async fn sweep_removes_only_suppressed_pending_rows() {
        let (ledger, db) = ledger().await;
        let campaign = NewCampaign {
            id: "c1".into(),
            name: "Promo".into(),
            message_template: "Hello".into(),
            rate_limit_secs: 0,
        };
        // Legacy row stored in local form.
        db.create_campaign(
            &campaign,
            &[message("0712345678"), message("+254722222222"), message("+254733333333")],
        )
        .await
        .unwrap();

        ledger
            .mark_opted_out("+254712345678", None, None, OptOutSource::Reply)
            .await
            .unwrap();

        assert_eq!(ledger.sweep_campaign("c1").await.unwrap(), 1);
        let remaining = db.pending_messages("c1").await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(ledger.queued_messages_for("0712345678", Some("c1")).await.unwrap(), 0);
        assert_eq!(ledger.queued_messages_for("0722222222", Some("c1")).await.unwrap(), 1);
        assert_eq!(ledger.queued_messages_for("0722222222", Some("other")).await.unwrap(), 0);

        assert_eq!(ledger.sweep_campaign("c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_opt_out_clears_entries_and_queue() {
        let (ledger, _) = ledger().await;
        ledger
            .mark_opted_out("0712345678", None, None, OptOutSource::Reply)
            .await
            .unwrap();
        ledger
            .schedule_confirmation("0712345678", None, Duration::ZERO)
            .await
            .unwrap();

        let removed = ledger.remove_opt_out("712345678").await.unwrap();
        assert!(removed > 0);
        assert!(!ledger.is_opted_out("0712345678").await.unwrap());
        let stats = ledger.analytics().await.unwrap();
        assert_eq!(stats.total_opt_outs, 0);
        assert_eq!(stats.pending_confirmations, 0);
    }
}
