use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use meily_core::{
    domain::UserId,
    state::{ConversationState, StateStore},
    Result,
};
use sqlx::SqlitePool;
use tracing::debug;

use crate::storage;

/// Conversation state as JSON with an expiry. Expired rows read as absent.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Delete expired rows; returns how many went away.
    pub async fn purge_expired(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM conversation_states WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        let purged = res.rows_affected();
        debug!(purged, "expired conversation states purged");
        Ok(purged)
    }

    fn expiry(&self) -> i64 {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        Utc::now().timestamp().saturating_add(ttl)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, user: UserId) -> Result<Option<ConversationState>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT state FROM conversation_states WHERE user_id = ? AND expires_at > ?",
        )
        .bind(user.0)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, user: UserId, state: &ConversationState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        sqlx::query(
            "INSERT INTO conversation_states (user_id, state, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 state = excluded.state,
                 expires_at = excluded.expires_at",
        )
        .bind(user.0)
        .bind(json)
        .bind(self.expiry())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete(&self, user: UserId) -> Result<()> {
        sqlx::query("DELETE FROM conversation_states WHERE user_id = ?")
            .bind(user.0)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}
