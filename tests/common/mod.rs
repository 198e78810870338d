//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use bulk_sender::campaigns::model::{
    Campaign, CampaignMessage, CampaignStatus, MessageCounts, NewCampaign, NewMessage,
};
use bulk_sender::error::{DatabaseError, GatewayError, GatewayErrorKind, LlmError};
use bulk_sender::gateway::{GatewayCredential, MessageGateway, SendReceipt};
use bulk_sender::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use bulk_sender::optout::model::{ConfirmationTask, NewConfirmation, OptOutEntry, OptOutSource};
use bulk_sender::replies::model::{NewReply, Reply};
use bulk_sender::store::{Database, LibSqlBackend};

pub fn credential() -> GatewayCredential {
    GatewayCredential {
        account_sid: "AC_test".into(),
        auth_token: SecretString::from("token"),
        from: "whatsapp:+14155238886".into(),
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────

/// Records every accepted send. Failures can be queued per call.
#[derive(Default)]
pub struct ScriptedGateway {
    failures: Mutex<VecDeque<GatewayErrorKind>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, kind: GatewayErrorKind) {
        self.failures.lock().unwrap().push_back(kind);
    }

    /// `(to, body)` of every accepted send, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|(to, _)| to).collect()
    }
}

#[async_trait]
impl MessageGateway for ScriptedGateway {
    async fn send(
        &self,
        to: &str,
        body: &str,
        _credential: &GatewayCredential,
    ) -> Result<SendReceipt, GatewayError> {
        if let Some(kind) = self.failures.lock().unwrap().pop_front() {
            return Err(GatewayError::new("scripted", kind, "scripted failure"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(SendReceipt {
            provider_id: format!("SM{}", sent.len()),
            status: "queued".into(),
        })
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────

/// Returns a fixed completion, or fails every call when `content` is None.
pub struct ScriptedLlm {
    content: Option<String>,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn answering(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            content: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.content {
            Some(content) => Ok(CompletionResponse {
                content: content.clone(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "service unavailable".into(),
            }),
        }
    }
}

// ── Database ────────────────────────────────────────────────────────────

/// In-memory database with injected failures.
///
/// `failing(n)` breaks `pending_messages` for the first `n` calls.
/// `reply_writes_broken()` breaks reply storage and correlation for good.
pub struct FlakyDb {
    inner: LibSqlBackend,
    failures_left: AtomicU32,
    replies_broken: bool,
}

impl FlakyDb {
    pub async fn failing(times: u32) -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            failures_left: AtomicU32::new(times),
            replies_broken: false,
        }
    }

    pub async fn reply_writes_broken() -> Self {
        Self {
            replies_broken: true,
            ..Self::failing(0).await
        }
    }

    fn reply_failure(&self) -> Result<(), DatabaseError> {
        if self.replies_broken {
            return Err(DatabaseError::Query("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for FlakyDb {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        messages: &[NewMessage],
    ) -> Result<Campaign, DatabaseError> {
        self.inner.create_campaign(campaign, messages).await
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError> {
        self.inner.get_campaign(id).await
    }

    async fn list_campaigns(&self, limit: usize) -> Result<Vec<Campaign>, DatabaseError> {
        self.inner.list_campaigns(limit).await
    }

    async fn update_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.inner.update_campaign_status(id, status, at).await
    }

    async fn pending_messages(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignMessage>, DatabaseError> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DatabaseError::Query("injected failure".into()));
        }
        self.inner.pending_messages(campaign_id).await
    }

    async fn list_messages(&self, campaign_id: &str) -> Result<Vec<CampaignMessage>, DatabaseError> {
        self.inner.list_messages(campaign_id).await
    }

    async fn get_message(&self, id: i64) -> Result<Option<CampaignMessage>, DatabaseError> {
        self.inner.get_message(id).await
    }

    async fn mark_message_sent(&self, id: i64, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        self.inner.mark_message_sent(id, at).await
    }

    async fn mark_message_failed(
        &self,
        id: i64,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        self.inner.mark_message_failed(id, at, error).await
    }

    async fn increment_message_retry(&self, id: i64) -> Result<i64, DatabaseError> {
        self.inner.increment_message_retry(id).await
    }

    async fn message_counts(&self, campaign_id: &str) -> Result<MessageCounts, DatabaseError> {
        self.inner.message_counts(campaign_id).await
    }

    async fn latest_message_for(
        &self,
        phones: &[String],
    ) -> Result<Option<CampaignMessage>, DatabaseError> {
        self.reply_failure()?;
        self.inner.latest_message_for(phones).await
    }

    async fn delete_suppressed_pending(&self, campaign_id: &str) -> Result<u64, DatabaseError> {
        self.inner.delete_suppressed_pending(campaign_id).await
    }

    async fn count_pending_for(
        &self,
        campaign_id: Option<&str>,
        phones: &[String],
    ) -> Result<i64, DatabaseError> {
        self.inner.count_pending_for(campaign_id, phones).await
    }

    async fn insert_reply(&self, reply: &NewReply) -> Result<Reply, DatabaseError> {
        self.reply_failure()?;
        self.inner.insert_reply(reply).await
    }

    async fn list_replies(
        &self,
        campaign_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reply>, DatabaseError> {
        self.inner.list_replies(campaign_id, limit).await
    }

    async fn insert_opt_out(
        &self,
        phone: &str,
        sender_name: Option<&str>,
        reason: Option<&str>,
        source: OptOutSource,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.inner
            .insert_opt_out(phone, sender_name, reason, source, at)
            .await
    }

    async fn any_opted_out(&self, phones: &[String]) -> Result<bool, DatabaseError> {
        self.inner.any_opted_out(phones).await
    }

    async fn list_opt_outs(&self, limit: usize) -> Result<Vec<OptOutEntry>, DatabaseError> {
        self.inner.list_opt_outs(limit).await
    }

    async fn delete_opt_outs(&self, phones: &[String]) -> Result<u64, DatabaseError> {
        self.inner.delete_opt_outs(phones).await
    }

    async fn count_opt_outs(&self, since: Option<DateTime<Utc>>) -> Result<i64, DatabaseError> {
        self.inner.count_opt_outs(since).await
    }

    async fn insert_confirmation(
        &self,
        task: &NewConfirmation,
    ) -> Result<ConfirmationTask, DatabaseError> {
        self.inner.insert_confirmation(task).await
    }

    async fn due_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfirmationTask>, DatabaseError> {
        self.inner.due_confirmations(now).await
    }

    async fn mark_confirmation_sent(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.inner.mark_confirmation_sent(id, at).await
    }

    async fn delete_unsent_confirmations(&self, phones: &[String]) -> Result<u64, DatabaseError> {
        self.inner.delete_unsent_confirmations(phones).await
    }

    async fn count_pending_confirmations(&self) -> Result<i64, DatabaseError> {
        self.inner.count_pending_confirmations().await
    }
}
