//! Campaign dispatch engine.
//!
//! One campaign is processed by one task, strictly in message insertion
//! order, with a fixed sleep after every send. Only `pending` rows are ever
//! loaded, so re-running a campaign after a crash never re-sends a message
//! that already reached a terminal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::campaigns::model::{
    Campaign, CampaignMessage, CampaignStats, CampaignStatus, Contact, MessageStatus,
    NewCampaign, NewMessage,
};
use crate::campaigns::personalize::personalize;
use crate::config::DispatchConfig;
use crate::error::{CampaignError, DatabaseError, GatewayErrorKind};
use crate::gateway::{GatewayCredential, MessageGateway};
use crate::phone::NumberingPlan;
use crate::retry::{Sleeper, exponential_backoff};
use crate::store::Database;

/// Outcome of one pass over a campaign's pending messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Launches campaigns and drives their message loops.
#[derive(Clone)]
pub struct DispatchEngine {
    db: Arc<dyn Database>,
    gateway: Arc<dyn MessageGateway>,
    sleeper: Arc<dyn Sleeper>,
    plan: NumberingPlan,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn MessageGateway>,
        sleeper: Arc<dyn Sleeper>,
        plan: NumberingPlan,
        config: DispatchConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            sleeper,
            plan,
            config,
        }
    }

    /// Validate `contacts`, render one message per contact and persist the
    /// campaign in `pending`.
    ///
    /// Nothing is written unless every contact is valid. `delay` defaults to
    /// the configured inter-message delay.
    pub async fn launch(
        &self,
        name: &str,
        template: &str,
        contacts: &[Contact],
        delay: Option<Duration>,
    ) -> Result<Campaign, CampaignError> {
        if contacts.is_empty() {
            return Err(CampaignError::NoContacts);
        }

        let mut problems = Vec::new();
        let mut messages = Vec::with_capacity(contacts.len());
        for (i, contact) in contacts.iter().enumerate() {
            let row = i + 1;
            let name = contact.name.trim();
            if name.is_empty() {
                problems.push(format!("row {row}: missing name"));
                continue;
            }
            let Some(phone) = self.plan.normalize(&contact.phone) else {
                problems.push(format!("row {row}: invalid phone '{}'", contact.phone));
                continue;
            };
            messages.push(NewMessage {
                phone_number: phone,
                name: name.to_string(),
                message_content: personalize(template, &contact.template_values()),
            });
        }

        if !problems.is_empty() {
            warn!(rejected = problems.len(), "Campaign launch rejected");
            return Err(CampaignError::InvalidContacts(problems));
        }

        let delay = delay.unwrap_or(self.config.default_delay);
        let campaign = NewCampaign {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            message_template: template.to_string(),
            rate_limit_secs: i64::try_from(delay.as_secs()).unwrap_or(i64::MAX),
        };
        let campaign = self.db.create_campaign(&campaign, &messages).await?;
        info!(
            campaign_id = %campaign.id,
            contacts = campaign.total_contacts,
            "Campaign created"
        );
        Ok(campaign)
    }

    /// Run `campaign_id` in a background task.
    pub fn spawn(
        &self,
        campaign_id: String,
        credential: GatewayCredential,
    ) -> JoinHandle<Result<DispatchSummary, CampaignError>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.run_campaign(&campaign_id, &credential).await;
            if let Err(e) = &result {
                error!(campaign_id = %campaign_id, error = %e, "Campaign dispatch gave up");
            }
            result
        })
    }

    /// Process a campaign, restarting the whole pass after an unexpected
    /// failure until the retry budget runs out.
    pub async fn run_campaign(
        &self,
        campaign_id: &str,
        credential: &GatewayCredential,
    ) -> Result<DispatchSummary, CampaignError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match self.process_campaign_once(campaign_id, credential).await {
                Ok(summary) => return Ok(summary),
                Err(CampaignError::NotFound(id)) => return Err(CampaignError::NotFound(id)),
                Err(e) => e,
            };

            error!(campaign_id = %campaign_id, attempt = attempts, error = %err, "Campaign pass failed");
            if let Err(e) = self
                .db
                .update_campaign_status(campaign_id, CampaignStatus::Failed, Utc::now())
                .await
            {
                error!(campaign_id = %campaign_id, error = %e, "Failed to mark campaign failed");
            }

            if attempts > self.config.campaign_max_retries {
                return Err(CampaignError::RetriesExhausted {
                    id: campaign_id.to_string(),
                    attempts,
                    reason: err.to_string(),
                });
            }

            info!(
                campaign_id = %campaign_id,
                cooldown_secs = self.config.campaign_retry_cooldown.as_secs(),
                "Retrying campaign"
            );
            self.sleeper.sleep(self.config.campaign_retry_cooldown).await;
        }
    }

    /// One pass: `running`, send every pending message, `completed`.
    ///
    /// Gateway failures are recorded on the message and the loop continues.
    /// Persistence failures abort the pass.
    pub async fn process_campaign_once(
        &self,
        campaign_id: &str,
        credential: &GatewayCredential,
    ) -> Result<DispatchSummary, CampaignError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| CampaignError::NotFound(campaign_id.to_string()))?;

        // Completed campaigns are immutable.
        if campaign.status == CampaignStatus::Completed {
            debug!(campaign_id = %campaign_id, "Campaign already completed");
            return Ok(DispatchSummary::default());
        }

        self.db
            .update_campaign_status(campaign_id, CampaignStatus::Running, Utc::now())
            .await?;

        let pending = self.db.pending_messages(campaign_id).await?;
        let delay = Duration::from_secs(u64::try_from(campaign.rate_limit_secs).unwrap_or(0));
        info!(
            campaign_id = %campaign_id,
            pending = pending.len(),
            delay_secs = delay.as_secs(),
            "Campaign running"
        );

        let mut summary = DispatchSummary::default();
        for message in &pending {
            match self.attempt_send(message, credential).await? {
                MessageStatus::Sent => summary.sent += 1,
                MessageStatus::Failed => summary.failed += 1,
                _ => {}
            }
            self.sleeper.sleep(delay).await;
        }

        self.db
            .update_campaign_status(campaign_id, CampaignStatus::Completed, Utc::now())
            .await?;
        info!(
            campaign_id = %campaign_id,
            sent = summary.sent,
            failed = summary.failed,
            "Campaign completed"
        );
        Ok(summary)
    }

    /// Send one message with rate-limit backoff.
    ///
    /// A rate-limited send is retried after `2^attempt * base` until the
    /// per-message budget is used up. Any other failure is terminal at once.
    pub async fn send_single(
        &self,
        message_id: i64,
        credential: &GatewayCredential,
    ) -> Result<MessageStatus, CampaignError> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "message".into(),
                id: message_id.to_string(),
            })?;
        if message.status != MessageStatus::Pending {
            debug!(message_id, status = %message.status, "Message already processed");
            return Ok(message.status);
        }

        let mut attempt = u32::try_from(message.retry_count).unwrap_or(0);
        loop {
            match self
                .gateway
                .send(&message.phone_number, &message.message_content, credential)
                .await
            {
                Ok(_) => {
                    self.db.mark_message_sent(message_id, Utc::now()).await?;
                    return Ok(MessageStatus::Sent);
                }
                Err(e)
                    if e.kind == GatewayErrorKind::RateLimited
                        && attempt < self.config.message_max_retries =>
                {
                    let wait = exponential_backoff(attempt, self.config.message_backoff_base);
                    let retries = self.db.increment_message_retry(message_id).await?;
                    attempt = u32::try_from(retries).unwrap_or(u32::MAX);
                    warn!(message_id, attempt, wait_secs = wait.as_secs(), "Rate limited, backing off");
                    self.sleeper.sleep(wait).await;
                }
                Err(e) => {
                    warn!(message_id, error = %e, "Message failed");
                    self.db
                        .mark_message_failed(message_id, Utc::now(), &e.to_string())
                        .await?;
                    return Ok(MessageStatus::Failed);
                }
            }
        }
    }

    pub async fn campaign_stats(&self, campaign_id: &str) -> Result<CampaignStats, CampaignError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| CampaignError::NotFound(campaign_id.to_string()))?;
        let counts = self.db.message_counts(campaign_id).await?;
        Ok(CampaignStats { campaign, counts })
    }

    pub async fn list_campaigns(&self, limit: usize) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.db.list_campaigns(limit).await?)
    }

    /// Single gateway attempt for the main loop; the outcome is persisted
    /// before returning.
    async fn attempt_send(
        &self,
        message: &CampaignMessage,
        credential: &GatewayCredential,
    ) -> Result<MessageStatus, DatabaseError> {
        match self
            .gateway
            .send(&message.phone_number, &message.message_content, credential)
            .await
        {
            Ok(receipt) => {
                if !self.db.mark_message_sent(message.id, Utc::now()).await? {
                    debug!(message_id = message.id, "Message no longer pending");
                }
                debug!(message_id = message.id, sid = %receipt.provider_id, "Message sent");
                Ok(MessageStatus::Sent)
            }
            Err(e) => {
                warn!(
                    message_id = message.id,
                    phone = %message.phone_number,
                    kind = ?e.kind,
                    error = %e,
                    "Message send failed"
                );
                self.db
                    .mark_message_failed(message.id, Utc::now(), &e.to_string())
                    .await?;
                Ok(MessageStatus::Failed)
            }
        }
    }
}
