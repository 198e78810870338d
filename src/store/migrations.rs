//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! On first run against a legacy DB (campaign tables exist, no `_migrations`
//! table), it adds the columns newer code expects and seeds V1 without
//! re-creating tables.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                message_template TEXT NOT NULL,
                total_contacts INTEGER NOT NULL DEFAULT 0,
                rate_limit INTEGER NOT NULL DEFAULT 2,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                phone_number TEXT NOT NULL,
                name TEXT NOT NULL,
                message_content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at TEXT,
                delivered_at TEXT,
                failed_at TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_messages_campaign_status
                ON messages(campaign_id, status);
            CREATE INDEX IF NOT EXISTS idx_messages_phone ON messages(phone_number);

            CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL,
                sender_name TEXT,
                message_content TEXT NOT NULL,
                received_at TEXT NOT NULL,
                campaign_id TEXT,
                original_message_id INTEGER,
                reply_type TEXT NOT NULL DEFAULT 'text',
                media_url TEXT,
                media_type TEXT,
                sentiment TEXT,
                confidence_score REAL NOT NULL DEFAULT 0.0,
                is_opt_out INTEGER NOT NULL DEFAULT 0,
                requires_attention INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_replies_campaign ON replies(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_replies_received ON replies(received_at);
        "#,
    },
    Migration {
        version: 2,
        name: "opt_out_ledger",
        sql: r#"
            CREATE TABLE IF NOT EXISTS opt_out_list (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT UNIQUE NOT NULL,
                sender_name TEXT,
                opted_out_at TEXT NOT NULL,
                reason TEXT,
                source TEXT NOT NULL DEFAULT 'reply'
            );
            CREATE INDEX IF NOT EXISTS idx_optout_list_phone ON opt_out_list(phone_number);

            CREATE TABLE IF NOT EXISTS opt_out_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL,
                sender_name TEXT,
                message TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_optout_queue_scheduled
                ON opt_out_queue(scheduled_time, sent);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
/// Detects legacy databases (tables exist but no `_migrations` table) and
/// seeds V1 without re-running schema DDL.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    if current_version == 0 && legacy_tables_exist(conn).await? {
        // Older databases predate the replies table and the attention columns.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL,
                sender_name TEXT,
                message_content TEXT NOT NULL,
                received_at TEXT NOT NULL,
                campaign_id TEXT,
                original_message_id INTEGER,
                reply_type TEXT NOT NULL DEFAULT 'text',
                media_url TEXT,
                media_type TEXT,
                sentiment TEXT,
                confidence_score REAL NOT NULL DEFAULT 0.0,
                is_opt_out INTEGER NOT NULL DEFAULT 0,
                requires_attention INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_campaign_status
                ON messages(campaign_id, status);
            CREATE INDEX IF NOT EXISTS idx_messages_phone ON messages(phone_number);",
        )
        .await
        .map_err(|e| {
            DatabaseError::Migration(format!("Failed to create reply tables on legacy DB: {e}"))
        })?;

        // Idempotent column additions; errors mean the column already exists.
        let _ = conn
            .execute(
                "ALTER TABLE replies ADD COLUMN confidence_score REAL NOT NULL DEFAULT 0.0",
                (),
            )
            .await;
        let _ = conn
            .execute(
                "ALTER TABLE replies ADD COLUMN requires_attention INTEGER NOT NULL DEFAULT 0",
                (),
            )
            .await;
        let _ = conn
            .execute(
                "ALTER TABLE messages ADD COLUMN retry_count INTEGER NOT NULL DEFAULT 0",
                (),
            )
            .await;

        seed_version(conn, 1, "initial_schema").await?;
        tracing::info!("Legacy database detected, seeded migration V1");
    }

    let current_version = get_current_version(conn).await?;
    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Check if a pre-migration campaigns table already exists.
async fn legacy_tables_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='campaigns'",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count > 0)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
