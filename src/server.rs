//! HTTP surface: inbound webhook plus a small REST API.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::campaigns::{Contact, DispatchEngine};
use crate::error::CampaignError;
use crate::gateway::GatewayCredential;
use crate::optout::OptOutLedger;
use crate::replies::{InboundPayload, ReplyPipeline};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: DispatchEngine,
    pub ledger: OptOutLedger,
    pub pipeline: Arc<ReplyPipeline>,
    /// Outbound credentials. Campaign creation is refused without them.
    pub credential: Option<GatewayCredential>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/replies", get(list_replies))
        .route("/api/opt-outs", get(list_opt_outs))
        .route("/api/opt-outs/analytics", get(opt_out_analytics))
        .route("/api/opt-outs/{phone}", delete(remove_opt_out))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `0.0.0.0:port` and serve until the process exits.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "HTTP server listening");
    axum::serve(listener, router(state)).await
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "bulk-sender"
    }))
}

// ── Webhook ─────────────────────────────────────────────────────────────

/// Twilio's inbound message form. Field names follow Twilio.
#[derive(Debug, Default, Deserialize)]
struct WebhookForm {
    #[serde(rename = "From", default)]
    from: String,
    #[serde(rename = "Body", default)]
    body: String,
    #[serde(rename = "NumMedia", default)]
    num_media: Option<String>,
    #[serde(rename = "MediaUrl0", default)]
    media_url: Option<String>,
    #[serde(rename = "MediaContentType0", default)]
    media_type: Option<String>,
}

impl From<WebhookForm> for InboundPayload {
    fn from(form: WebhookForm) -> Self {
        Self {
            from: form.from,
            body: form.body,
            media_count: form
                .num_media
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(0),
            media_url: form.media_url.filter(|s| !s.is_empty()),
            media_type: form.media_type.filter(|s| !s.is_empty()),
        }
    }
}

/// POST /webhook/whatsapp
///
/// Always answers 200 with TwiML so Twilio doesn't redeliver.
///
/// The body is decoded by hand so a missing or wrong content type still gets
/// a TwiML answer instead of an extractor rejection.
async fn whatsapp_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let form: WebhookForm = match serde_urlencoded::from_bytes(&body) {
        Ok(form) => form,
        Err(e) => {
            warn!(error = %e, "Undecodable webhook body");
            return twiml_response("");
        }
    };
    let payload = InboundPayload::from(form);
    info!(from = %payload.from, media = payload.media_count, "Inbound WhatsApp message");
    let outcome = state.pipeline.ingest_payload(&payload).await;
    twiml_response(&outcome.auto_response)
}

fn twiml_response(message: &str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        twiml(message),
    )
        .into_response()
}

fn twiml(message: &str) -> String {
    if message.is_empty() {
        return r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#.to_string();
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message>{}</Message></Response>"#,
        xml_escape(message)
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Campaigns ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateCampaignRequest {
    name: String,
    template: String,
    #[serde(default)]
    delay_secs: Option<u64>,
    contacts: Vec<Contact>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCampaignResponse {
    pub campaign_id: String,
    pub total_contacts: i64,
    /// Contacts dropped because they had already opted out.
    pub suppressed: u64,
}

/// POST /api/campaigns
///
/// Persists the campaign, sweeps opted-out numbers, then starts dispatch in
/// the background.
async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Response {
    let Some(credential) = state.credential.clone() else {
        return error_json(
            StatusCode::SERVICE_UNAVAILABLE,
            "Messaging gateway is not configured",
        );
    };

    let delay = req.delay_secs.map(std::time::Duration::from_secs);
    let campaign = match state
        .engine
        .launch(&req.name, &req.template, &req.contacts, delay)
        .await
    {
        Ok(campaign) => campaign,
        Err(CampaignError::InvalidContacts(rows)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "Invalid contacts",
                    "details": rows,
                })),
            )
                .into_response();
        }
        Err(CampaignError::NoContacts) => {
            return error_json(StatusCode::BAD_REQUEST, "No contacts supplied");
        }
        Err(e) => {
            error!(error = %e, "Campaign launch failed");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let suppressed = match state.ledger.sweep_campaign(&campaign.id).await {
        Ok(n) => n,
        Err(e) => {
            // Not safe to send without the sweep.
            error!(campaign_id = %campaign.id, error = %e, "Opt-out sweep failed");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    state.engine.spawn(campaign.id.clone(), credential);

    (
        StatusCode::ACCEPTED,
        Json(CreateCampaignResponse {
            campaign_id: campaign.id,
            total_contacts: campaign.total_contacts,
            suppressed,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// GET /api/campaigns
async fn list_campaigns(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    match state.engine.list_campaigns(clamp_limit(q.limit)).await {
        Ok(campaigns) => Json(campaigns).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/campaigns/{id}
async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.campaign_stats(&id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(CampaignError::NotFound(_)) => {
            error_json(StatusCode::NOT_FOUND, format!("Campaign {id} not found"))
        }
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Replies ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RepliesQuery {
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// GET /api/replies?campaign_id=&limit=
async fn list_replies(State(state): State<AppState>, Query(q): Query<RepliesQuery>) -> Response {
    let campaign_id = q.campaign_id.as_deref().filter(|s| !s.is_empty());
    match state
        .pipeline
        .list_replies(campaign_id, clamp_limit(q.limit))
        .await
    {
        Ok(replies) => Json(replies).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Opt-outs ────────────────────────────────────────────────────────────

/// GET /api/opt-outs
async fn list_opt_outs(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    match state.ledger.entries(clamp_limit(q.limit)).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/opt-outs/analytics
async fn opt_out_analytics(State(state): State<AppState>) -> Response {
    match state.ledger.analytics().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// DELETE /api/opt-outs/{phone}
async fn remove_opt_out(State(state): State<AppState>, Path(phone): Path<String>) -> Response {
    match state.ledger.remove_opt_out(&phone).await {
        Ok(0) => error_json(StatusCode::NOT_FOUND, format!("{phone} is not opted out")),
        Ok(removed) => {
            warn!(phone = %phone, removed, "Opt-out removed by operator");
            Json(serde_json::json!({ "removed": removed })).into_response()
        }
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
