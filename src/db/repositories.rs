//! Repositories: presence sessions and the display title read.

use crate::error::{AppError, AppResult};
use crate::models::{Identity, Snowflake};
use crate::services::snowflake::SnowflakeGenerator;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::time::Duration;

use super::DbPool;

const DISPLAY_TITLE_KEY: &str = "movie";

/// Create the sessions table and its indexes if missing.
pub async fn ensure_schema(pool: &DbPool) -> AppResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id BIGINT PRIMARY KEY,
            key BYTEA NOT NULL,
            addr TEXT NOT NULL,
            user_agent TEXT NOT NULL DEFAULT '',
            first_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS sessions_key_last_seen ON sessions (key, last_seen DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS sessions_last_seen ON sessions (last_seen)")
        .execute(pool)
        .await?;
    Ok(())
}

// ---- Sessions ----

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub id: Snowflake,
    pub key: Vec<u8>,
    pub addr: String,
    pub user_agent: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Whole seconds, as the interval arithmetic below expects.
fn whole_secs(d: Duration) -> f64 {
    d.as_secs() as f64
}

/// Refresh the latest session of this key if it was seen within `inactive_limit`,
/// otherwise open a new one. Both branches run in one transaction holding the row lock.
pub async fn session_upsert(
    pool: &DbPool,
    ids: &SnowflakeGenerator,
    identity: &Identity,
    inactive_limit: Duration,
) -> AppResult<SessionRow> {
    let mut tx = pool.begin().await?;

    let current: Option<Snowflake> = sqlx::query_scalar(
        r#"
        SELECT id FROM sessions
        WHERE key = $1 AND last_seen > NOW() - make_interval(secs => $2)
        ORDER BY last_seen DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(&identity.key)
    .bind(whole_secs(inactive_limit))
    .fetch_optional(&mut *tx)
    .await?;

    let row = match current {
        Some(id) => {
            sqlx::query_as::<_, SessionRow>(
                r#"
                UPDATE sessions SET last_seen = GREATEST(NOW(), last_seen)
                WHERE id = $1
                RETURNING id, key, addr, user_agent, first_seen, last_seen
                "#,
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_as::<_, SessionRow>(
                r#"
                INSERT INTO sessions (id, key, addr, user_agent)
                VALUES ($1, $2, $3, $4)
                RETURNING id, key, addr, user_agent, first_seen, last_seen
                "#,
            )
            .bind(ids.next())
            .bind(&identity.key)
            .bind(&identity.address)
            .bind(&identity.user_agent)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    tx.commit().await?;
    Ok(row)
}

/// Latest session for a key.
pub async fn session_fetch(pool: &DbPool, key: &[u8]) -> AppResult<SessionRow> {
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT id, key, addr, user_agent, first_seen, last_seen FROM sessions
        WHERE key = $1
        ORDER BY last_seen DESC
        LIMIT 1
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    row.ok_or_else(|| AppError::NotFound(format!("session {}", hex::encode(key))))
}

/// Distinct keys seen within `window` of the database clock.
pub async fn session_count(pool: &DbPool, window: Duration) -> AppResult<i64> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT key) FROM sessions WHERE last_seen > NOW() - make_interval(secs => $1)",
    )
    .bind(whole_secs(window))
    .fetch_one(pool)
    .await?;
    Ok(n)
}

pub async fn session_prune(pool: &DbPool, retention: Duration) -> AppResult<u64> {
    let r = sqlx::query("DELETE FROM sessions WHERE last_seen < NOW() - make_interval(secs => $1)")
        .bind(whole_secs(retention))
        .execute(pool)
        .await?;
    Ok(r.rows_affected())
}

// ---- Metadata (read-only; written by the operator tooling) ----

/// The title currently flagged for display. `NotFound` when no such entry exists.
pub async fn metadata_display_title(pool: &DbPool) -> AppResult<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM metadata WHERE key = $1 AND display")
            .bind(DISPLAY_TITLE_KEY)
            .fetch_optional(pool)
            .await?;
    row.map(|(value,)| value)
        .ok_or_else(|| AppError::NotFound(format!("metadata {}", DISPLAY_TITLE_KEY)))
}
