//! Inbound reply pipeline.
//!
//! normalize → correlate → classify → persist → suppress → respond.
//!
//! Every step absorbs its own failure. The webhook caller always gets an
//! outcome back, so the messaging transport never retries the delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::campaigns::model::CampaignMessage;
use crate::classifier::{Category, Classification, ReplyClassifier};
use crate::error::DatabaseError;
use crate::optout::{OptOutLedger, OptOutSource};
use crate::replies::model::{InboundPayload, IngestOutcome, NewReply, Reply};
use crate::replies::responses::AutoResponder;
use crate::store::Database;

/// Display name used when no earlier message identifies the sender.
pub const UNKNOWN_SENDER: &str = "Unknown";

pub struct ReplyPipeline {
    db: Arc<dyn Database>,
    classifier: Arc<ReplyClassifier>,
    ledger: OptOutLedger,
    responder: AutoResponder,
}

impl ReplyPipeline {
    pub fn new(
        db: Arc<dyn Database>,
        classifier: Arc<ReplyClassifier>,
        ledger: OptOutLedger,
        responder: AutoResponder,
    ) -> Self {
        Self {
            db,
            classifier,
            ledger,
            responder,
        }
    }

    /// Ingest a webhook payload. Media fields are only honoured when the
    /// payload reports at least one attachment.
    pub async fn ingest_payload(&self, payload: &InboundPayload) -> IngestOutcome {
        let (media_url, media_type) = if payload.media_count > 0 {
            (payload.media_url.as_deref(), payload.media_type.as_deref())
        } else {
            (None, None)
        };
        self.ingest(&payload.from, &payload.body, media_url, media_type)
            .await
    }

    pub async fn ingest(
        &self,
        raw_phone: &str,
        text: &str,
        media_url: Option<&str>,
        media_type: Option<&str>,
    ) -> IngestOutcome {
        let plan = self.ledger.plan();
        let stripped = plan.strip_transport(raw_phone);
        let phone = plan
            .normalize(stripped)
            .unwrap_or_else(|| stripped.to_string());
        let variations = plan.variations(stripped);

        let previous = self.correlate(&phone, &variations).await;
        let classification = self.classify(text).await;
        let sender_name = previous
            .as_ref()
            .map(|m| m.name.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_SENDER)
            .to_string();

        let reply = NewReply {
            phone_number: phone.clone(),
            sender_name: sender_name.clone(),
            message_content: text.to_string(),
            received_at: Utc::now(),
            campaign_id: previous.as_ref().map(|m| m.campaign_id.clone()),
            original_message_id: previous.as_ref().map(|m| m.id),
            media_url: media_url.map(String::from),
            media_type: media_type.map(String::from),
            sentiment: classification.category,
            confidence_score: classification.confidence,
            is_opt_out: classification.is_opt_out,
            requires_attention: classification.requires_attention,
        };

        let reply_id = match self.db.insert_reply(&reply).await {
            Ok(stored) => {
                info!(
                    reply_id = stored.id,
                    phone = %phone,
                    category = %classification.category,
                    opt_out = classification.is_opt_out,
                    "Reply stored"
                );
                Some(stored.id)
            }
            Err(e) => {
                error!(phone = %phone, error = %e, "Failed to store reply");
                None
            }
        };

        if classification.is_opt_out {
            self.suppress(&phone, &sender_name, text).await;
        }

        IngestOutcome {
            reply_id,
            auto_response: self
                .responder
                .compose(classification.category, classification.is_opt_out),
        }
    }

    /// Replies newest first, optionally for one campaign.
    pub async fn list_replies(
        &self,
        campaign_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reply>, DatabaseError> {
        self.db.list_replies(campaign_id, limit).await
    }

    async fn correlate(&self, phone: &str, variations: &[String]) -> Option<CampaignMessage> {
        match self.db.latest_message_for(variations).await {
            Ok(found) => found,
            Err(e) => {
                warn!(phone = %phone, error = %e, "Reply correlation failed");
                None
            }
        }
    }

    /// Classifier verdict, overridden to opt-out when the stop-keyword scan
    /// fires even though the classifier disagreed.
    async fn classify(&self, text: &str) -> Classification {
        let classification = self.classifier.classify(text).await;
        if !classification.is_opt_out && self.classifier.keyword_opt_out(text) {
            info!(
                category = %classification.category,
                "Stop keyword present, treating reply as opt-out"
            );
            return Classification::new(
                Category::OptOutDesired,
                classification.confidence,
                true,
                classification.source,
            );
        }
        classification
    }

    async fn suppress(&self, phone: &str, sender_name: &str, text: &str) {
        if let Err(e) = self
            .ledger
            .mark_opted_out(phone, Some(sender_name), Some(text), OptOutSource::Reply)
            .await
        {
            error!(phone = %phone, error = %e, "Failed to record opt-out");
        }
        if let Err(e) = self
            .ledger
            .schedule_confirmation(phone, Some(sender_name), Duration::ZERO)
            .await
        {
            error!(phone = %phone, error = %e, "Failed to schedule opt-out confirmation");
        }
        match self.ledger.queued_messages_for(phone, None).await {
            Ok(0) => {}
            Ok(queued) => warn!(
                phone = %phone,
                queued,
                "Opted-out number still has queued campaign messages until the next sweep"
            ),
            Err(e) => warn!(phone = %phone, error = %e, "Failed to count queued messages"),
        }
    }
}
