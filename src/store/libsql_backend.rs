//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::campaigns::model::{
    Campaign, CampaignMessage, CampaignStatus, MessageCounts, MessageStatus, NewCampaign,
    NewMessage,
};
use crate::classifier::Category;
use crate::error::DatabaseError;
use crate::optout::model::{ConfirmationTask, NewConfirmation, OptOutEntry, OptOutSource};
use crate::replies::model::{NewReply, Reply, ReplyKind};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn count(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams + Send,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("count: {e}"))),
            None => Ok(0),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width so text comparison in SQL
/// orders chronologically.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // SQLite CURRENT_TIMESTAMP output, with and without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_integer(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, libsql::Error> {
    let status_str: String = row
        .get::<String>(5)
        .unwrap_or_else(|_| "pending".into());
    let created_str: String = row.get::<String>(6).unwrap_or_default();
    let started_str: Option<String> = row.get(7).ok();
    let completed_str: Option<String> = row.get(8).ok();

    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        message_template: row.get(2)?,
        total_contacts: row.get::<i64>(3).unwrap_or(0),
        rate_limit_secs: row.get::<i64>(4).unwrap_or(0),
        status: status_str.parse().unwrap_or(CampaignStatus::Pending),
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(&started_str),
        completed_at: parse_optional_datetime(&completed_str),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<CampaignMessage, libsql::Error> {
    let status_str: String = row
        .get::<String>(5)
        .unwrap_or_else(|_| "pending".into());
    let sent_str: Option<String> = row.get(6).ok();
    let delivered_str: Option<String> = row.get(7).ok();
    let failed_str: Option<String> = row.get(8).ok();

    Ok(CampaignMessage {
        id: row.get(0)?,
        campaign_id: row.get::<String>(1).unwrap_or_default(),
        phone_number: row.get::<String>(2).unwrap_or_default(),
        name: row.get::<String>(3).unwrap_or_default(),
        message_content: row.get::<String>(4).unwrap_or_default(),
        status: status_str.parse().unwrap_or(MessageStatus::Pending),
        sent_at: parse_optional_datetime(&sent_str),
        delivered_at: parse_optional_datetime(&delivered_str),
        failed_at: parse_optional_datetime(&failed_str),
        error_message: row.get(9).ok(),
        retry_count: row.get::<i64>(10).unwrap_or(0),
    })
}

fn row_to_reply(row: &libsql::Row) -> Result<Reply, libsql::Error> {
    let received_str: String = row.get::<String>(4).unwrap_or_default();
    let reply_type: String = row.get::<String>(7).unwrap_or_else(|_| "text".into());
    let sentiment: String = row.get::<String>(10).unwrap_or_else(|_| "neutral".into());

    Ok(Reply {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        sender_name: row
            .get::<String>(2)
            .unwrap_or_else(|_| "Unknown".into()),
        message_content: row.get::<String>(3).unwrap_or_default(),
        received_at: parse_datetime(&received_str),
        campaign_id: row.get(5).ok(),
        original_message_id: row.get(6).ok(),
        reply_type: reply_type.parse().unwrap_or(ReplyKind::Text),
        media_url: row.get(8).ok(),
        media_type: row.get(9).ok(),
        sentiment: sentiment.parse().unwrap_or(Category::Neutral),
        confidence_score: row.get::<f64>(11).unwrap_or(0.0) as f32,
        is_opt_out: row.get::<i64>(12).unwrap_or(0) != 0,
        requires_attention: row.get::<i64>(13).unwrap_or(0) != 0,
    })
}

fn row_to_confirmation(row: &libsql::Row) -> Result<ConfirmationTask, libsql::Error> {
    let scheduled_str: String = row.get::<String>(4).unwrap_or_default();
    let sent_at_str: Option<String> = row.get(6).ok();
    let created_str: String = row.get::<String>(7).unwrap_or_default();

    Ok(ConfirmationTask {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        sender_name: row.get(2).ok(),
        message: row.get::<String>(3).unwrap_or_default(),
        scheduled_time: parse_datetime(&scheduled_str),
        sent: row.get::<i64>(5).unwrap_or(0) != 0,
        sent_at: parse_optional_datetime(&sent_at_str),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_opt_out(row: &libsql::Row) -> Result<OptOutEntry, libsql::Error> {
    let opted_out_str: String = row.get::<String>(2).unwrap_or_default();
    let source: String = row.get::<String>(4).unwrap_or_else(|_| "reply".into());

    Ok(OptOutEntry {
        phone_number: row.get(0)?,
        sender_name: row.get(1).ok(),
        opted_out_at: parse_datetime(&opted_out_str),
        reason: row.get(3).ok(),
        source: source.parse().unwrap_or(OptOutSource::Reply),
    })
}

async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        out.push(map(&row).map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?);
    }
    Ok(out)
}

// ── Trait implementation ────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = "id, name, message_template, total_contacts, rate_limit, status, created_at, started_at, completed_at";

const MESSAGE_COLUMNS: &str = "id, campaign_id, phone_number, name, message_content, status, sent_at, delivered_at, failed_at, error_message, retry_count";

const REPLY_COLUMNS: &str = "id, phone_number, sender_name, message_content, received_at, campaign_id, original_message_id, reply_type, media_url, media_type, sentiment, confidence_score, is_opt_out, requires_attention";

const CONFIRMATION_COLUMNS: &str =
    "id, phone_number, sender_name, message, scheduled_time, sent, sent_at, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        messages: &[NewMessage],
    ) -> Result<Campaign, DatabaseError> {
        let now = Utc::now();
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_campaign begin: {e}")))?;

        tx.execute(
            "INSERT INTO campaigns (id, name, message_template, total_contacts, rate_limit, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                campaign.id.clone(),
                campaign.name.clone(),
                campaign.message_template.clone(),
                messages.len() as i64,
                campaign.rate_limit_secs,
                CampaignStatus::Pending.as_str(),
                fmt_datetime(&now),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_campaign: {e}")))?;

        for message in messages {
            tx.execute(
                "INSERT INTO messages (campaign_id, phone_number, name, message_content, status, retry_count) VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    campaign.id.clone(),
                    message.phone_number.clone(),
                    message.name.clone(),
                    message.message_content.clone(),
                    MessageStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_campaign message: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_campaign commit: {e}")))?;

        debug!(campaign_id = %campaign.id, messages = messages.len(), "Campaign inserted");

        Ok(Campaign {
            id: campaign.id.clone(),
            name: campaign.name.clone(),
            message_template: campaign.message_template.clone(),
            total_contacts: messages.len() as i64,
            rate_limit_secs: campaign.rate_limit_secs,
            status: CampaignStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?
        {
            Some(row) => Ok(Some(
                row_to_campaign(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_campaigns(&self, limit: usize) -> Result<Vec<Campaign>, DatabaseError> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        );
        let rows = self
            .conn()
            .query(&sql, params![limit as i64])
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns: {e}")))?;
        collect_rows(rows, "list_campaigns", row_to_campaign).await
    }

    async fn update_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let result = match status {
            CampaignStatus::Running => {
                conn.execute(
                    "UPDATE campaigns SET status = ?1, started_at = ?2 WHERE id = ?3",
                    params![status.as_str(), fmt_datetime(&at), id],
                )
                .await
            }
            CampaignStatus::Completed | CampaignStatus::Failed => {
                conn.execute(
                    "UPDATE campaigns SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![status.as_str(), fmt_datetime(&at), id],
                )
                .await
            }
            // Manual reset clears both stamps.
            CampaignStatus::Pending => {
                conn.execute(
                    "UPDATE campaigns SET status = ?1, started_at = NULL, completed_at = NULL WHERE id = ?2",
                    params![status.as_str(), id],
                )
                .await
            }
        };
        let affected =
            result.map_err(|e| DatabaseError::Query(format!("update_campaign_status: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "campaign".into(),
                id: id.to_string(),
            });
        }
        debug!(campaign_id = %id, status = %status, "Campaign status updated");
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn pending_messages(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignMessage>, DatabaseError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE campaign_id = ?1 AND status = 'pending' ORDER BY id ASC"
        );
        let rows = self
            .conn()
            .query(&sql, params![campaign_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("pending_messages: {e}")))?;
        collect_rows(rows, "pending_messages", row_to_message).await
    }

    async fn list_messages(&self, campaign_id: &str) -> Result<Vec<CampaignMessage>, DatabaseError> {
        let sql =
            format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE campaign_id = ?1 ORDER BY id ASC");
        let rows = self
            .conn()
            .query(&sql, params![campaign_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;
        collect_rows(rows, "list_messages", row_to_message).await
    }

    async fn get_message(&self, id: i64) -> Result<Option<CampaignMessage>, DatabaseError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        let rows = self
            .conn()
            .query(&sql, params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;
        Ok(collect_rows(rows, "get_message", row_to_message)
            .await?
            .into_iter()
            .next())
    }

    async fn mark_message_sent(&self, id: i64, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'sent', sent_at = ?1, error_message = NULL WHERE id = ?2 AND status = 'pending'",
                params![fmt_datetime(&at), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_sent: {e}")))?;
        Ok(affected > 0)
    }

    async fn mark_message_failed(
        &self,
        id: i64,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'failed', failed_at = ?1, error_message = ?2 WHERE id = ?3 AND status = 'pending'",
                params![fmt_datetime(&at), error, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_failed: {e}")))?;
        Ok(affected > 0)
    }

    async fn increment_message_retry(&self, id: i64) -> Result<i64, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET retry_count = retry_count + 1 WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_message_retry: {e}")))?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".into(),
                id: id.to_string(),
            });
        }
        self.count("SELECT retry_count FROM messages WHERE id = ?1", params![id])
            .await
    }

    async fn message_counts(&self, campaign_id: &str) -> Result<MessageCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM messages WHERE campaign_id = ?1 GROUP BY status",
                params![campaign_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("message_counts: {e}")))?;

        let mut counts = MessageCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("message_counts: {e}")))?
        {
            let status: String = row.get::<String>(0).unwrap_or_default();
            let n: i64 = row.get(1).unwrap_or(0);
            match status.parse::<MessageStatus>() {
                Ok(MessageStatus::Pending) => counts.pending += n,
                Ok(MessageStatus::Sent) => counts.sent += n,
                Ok(MessageStatus::Delivered) => counts.delivered += n,
                Ok(MessageStatus::Failed) => counts.failed += n,
                Err(_) => debug!(campaign_id = %campaign_id, status = %status, "Ignoring unknown message status"),
            }
        }
        Ok(counts)
    }

    async fn latest_message_for(
        &self,
        phones: &[String],
    ) -> Result<Option<CampaignMessage>, DatabaseError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE phone_number = ?1 \
             ORDER BY sent_at IS NULL, sent_at DESC, id DESC LIMIT 1"
        );

        let mut best: Option<CampaignMessage> = None;
        for phone in phones {
            let rows = self
                .conn()
                .query(&sql, params![phone.as_str()])
                .await
                .map_err(|e| DatabaseError::Query(format!("latest_message_for: {e}")))?;
            let Some(candidate) = collect_rows(rows, "latest_message_for", row_to_message)
                .await?
                .into_iter()
                .next()
            else {
                continue;
            };

            let newer = match &best {
                None => true,
                Some(current) => {
                    (candidate.sent_at.is_some(), candidate.sent_at, candidate.id)
                        > (current.sent_at.is_some(), current.sent_at, current.id)
                }
            };
            if newer {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    async fn delete_suppressed_pending(&self, campaign_id: &str) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM messages WHERE campaign_id = ?1 AND status = 'pending' \
                 AND phone_number IN (SELECT phone_number FROM opt_out_list)",
                params![campaign_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_suppressed_pending: {e}")))
    }

    async fn count_pending_for(
        &self,
        campaign_id: Option<&str>,
        phones: &[String],
    ) -> Result<i64, DatabaseError> {
        let mut total = 0;
        for phone in phones {
            total += match campaign_id {
                Some(campaign_id) => {
                    self.count(
                        "SELECT COUNT(*) FROM messages WHERE campaign_id = ?1 AND status = 'pending' AND phone_number = ?2",
                        params![campaign_id, phone.as_str()],
                    )
                    .await?
                }
                None => {
                    self.count(
                        "SELECT COUNT(*) FROM messages WHERE status = 'pending' AND phone_number = ?1",
                        params![phone.as_str()],
                    )
                    .await?
                }
            };
        }
        Ok(total)
    }

    // ── Replies ─────────────────────────────────────────────────────

    async fn insert_reply(&self, reply: &NewReply) -> Result<Reply, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO replies (phone_number, sender_name, message_content, received_at, campaign_id, original_message_id, reply_type, media_url, media_type, sentiment, confidence_score, is_opt_out, requires_attention, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                reply.phone_number.clone(),
                reply.sender_name.clone(),
                reply.message_content.clone(),
                fmt_datetime(&reply.received_at),
                opt_text(reply.campaign_id.as_deref()),
                opt_integer(reply.original_message_id),
                reply.reply_type().as_str(),
                opt_text(reply.media_url.as_deref()),
                opt_text(reply.media_type.as_deref()),
                reply.sentiment.as_str(),
                f64::from(reply.confidence_score),
                i64::from(reply.is_opt_out),
                i64::from(reply.requires_attention),
                fmt_datetime(&Utc::now()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_reply: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(reply_id = id, phone = %reply.phone_number, "Reply inserted");

        Ok(Reply {
            id,
            phone_number: reply.phone_number.clone(),
            sender_name: reply.sender_name.clone(),
            message_content: reply.message_content.clone(),
            received_at: reply.received_at,
            campaign_id: reply.campaign_id.clone(),
            original_message_id: reply.original_message_id,
            reply_type: reply.reply_type(),
            media_url: reply.media_url.clone(),
            media_type: reply.media_type.clone(),
            sentiment: reply.sentiment,
            confidence_score: reply.confidence_score,
            is_opt_out: reply.is_opt_out,
            requires_attention: reply.requires_attention,
        })
    }

    async fn list_replies(
        &self,
        campaign_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reply>, DatabaseError> {
        let rows = match campaign_id {
            Some(campaign_id) => {
                let sql = format!(
                    "SELECT {REPLY_COLUMNS} FROM replies WHERE campaign_id = ?1 ORDER BY received_at DESC, id DESC LIMIT ?2"
                );
                self.conn()
                    .query(&sql, params![campaign_id, limit as i64])
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {REPLY_COLUMNS} FROM replies ORDER BY received_at DESC, id DESC LIMIT ?1"
                );
                self.conn().query(&sql, params![limit as i64]).await
            }
        }
        .map_err(|e| DatabaseError::Query(format!("list_replies: {e}")))?;
        collect_rows(rows, "list_replies", row_to_reply).await
    }

    // ── Opt-out list ────────────────────────────────────────────────

    async fn insert_opt_out(
        &self,
        phone: &str,
        sender_name: Option<&str>,
        reason: Option<&str>,
        source: OptOutSource,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO opt_out_list (phone_number, sender_name, opted_out_at, reason, source) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    phone,
                    opt_text(sender_name),
                    fmt_datetime(&at),
                    opt_text(reason),
                    source.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_opt_out: {e}")))?;
        Ok(affected > 0)
    }

    async fn any_opted_out(&self, phones: &[String]) -> Result<bool, DatabaseError> {
        for phone in phones {
            let n = self
                .count(
                    "SELECT COUNT(*) FROM opt_out_list WHERE phone_number = ?1",
                    params![phone.as_str()],
                )
                .await?;
            if n > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn list_opt_outs(&self, limit: usize) -> Result<Vec<OptOutEntry>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT phone_number, sender_name, opted_out_at, reason, source FROM opt_out_list ORDER BY opted_out_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_opt_outs: {e}")))?;
        collect_rows(rows, "list_opt_outs", row_to_opt_out).await
    }

    async fn delete_opt_outs(&self, phones: &[String]) -> Result<u64, DatabaseError> {
        let mut removed = 0;
        for phone in phones {
            removed += self
                .conn()
                .execute(
                    "DELETE FROM opt_out_list WHERE phone_number = ?1",
                    params![phone.as_str()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_opt_outs: {e}")))?;
        }
        Ok(removed)
    }

    async fn count_opt_outs(&self, since: Option<DateTime<Utc>>) -> Result<i64, DatabaseError> {
        match since {
            Some(since) => {
                self.count(
                    "SELECT COUNT(*) FROM opt_out_list WHERE opted_out_at >= ?1",
                    params![fmt_datetime(&since)],
                )
                .await
            }
            None => self.count("SELECT COUNT(*) FROM opt_out_list", ()).await,
        }
    }

    // ── Confirmation queue ──────────────────────────────────────────

    async fn insert_confirmation(
        &self,
        task: &NewConfirmation,
    ) -> Result<ConfirmationTask, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO opt_out_queue (phone_number, sender_name, message, scheduled_time, sent, created_at) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                task.phone_number.clone(),
                opt_text(task.sender_name.as_deref()),
                task.message.clone(),
                fmt_datetime(&task.scheduled_time),
                fmt_datetime(&now),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_confirmation: {e}")))?;

        Ok(ConfirmationTask {
            id: conn.last_insert_rowid(),
            phone_number: task.phone_number.clone(),
            sender_name: task.sender_name.clone(),
            message: task.message.clone(),
            scheduled_time: task.scheduled_time,
            sent: false,
            sent_at: None,
            created_at: now,
        })
    }

    async fn due_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfirmationTask>, DatabaseError> {
        let sql = format!(
            "SELECT {CONFIRMATION_COLUMNS} FROM opt_out_queue WHERE sent = 0 AND scheduled_time <= ?1 ORDER BY scheduled_time ASC, id ASC"
        );
        let rows = self
            .conn()
            .query(&sql, params![fmt_datetime(&now)])
            .await
            .map_err(|e| DatabaseError::Query(format!("due_confirmations: {e}")))?;
        collect_rows(rows, "due_confirmations", row_to_confirmation).await
    }

    async fn mark_confirmation_sent(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE opt_out_queue SET sent = 1, sent_at = ?1 WHERE id = ?2 AND sent = 0",
                params![fmt_datetime(&at), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_confirmation_sent: {e}")))?;
        Ok(affected > 0)
    }

    async fn delete_unsent_confirmations(&self, phones: &[String]) -> Result<u64, DatabaseError> {
        let mut removed = 0;
        for phone in phones {
            removed += self
                .conn()
                .execute(
                    "DELETE FROM opt_out_queue WHERE phone_number = ?1 AND sent = 0",
                    params![phone.as_str()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_unsent_confirmations: {e}")))?;
        }
        Ok(removed)
    }

    async fn count_pending_confirmations(&self) -> Result<i64, DatabaseError> {
        self.count("SELECT COUNT(*) FROM opt_out_queue WHERE sent = 0", ())
            .await
    }
}
