use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meily_core::{
    domain::UserId,
    ports::{AudienceProvider, RecordStore},
    records::{
        AdminAction, ClientRecord, DeliveryRecord, EntryOutcome, LotteryEntry, RecordStats,
        UserProfile,
    },
    state::Audience,
    Result,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

use crate::storage;

/// Permanent records: registered users, clients, lottery entries, delivery points and the
/// admin action log.
#[derive(Clone)]
pub struct SqliteRecords {
    pool: SqlitePool,
}

impl SqliteRecords {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(n.max(0) as u64)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn entry_from_row(row: &SqliteRow) -> Result<LotteryEntry> {
    let ticket: i64 = row.try_get("ticket").map_err(storage)?;
    Ok(LotteryEntry {
        user_id: UserId(row.try_get("user_id").map_err(storage)?),
        ticket: u32::try_from(ticket).map_err(storage)?,
        receipt_fingerprint: row.try_get("receipt_fingerprint").map_err(storage)?,
        receipt_path: row.try_get("receipt_path").map_err(storage)?,
        paid_at: row.try_get::<DateTime<Utc>, _>("paid_at").map_err(storage)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecords {
    async fn register_user(&self, profile: &UserProfile) -> Result<bool> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO registered_users (user_id, first_name, registered_at)
             VALUES (?, ?, ?)",
        )
        .bind(profile.user_id.0)
        .bind(&profile.first_name)
        .bind(profile.registered_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(res.rows_affected() == 1)
    }

    async fn is_client_unique(&self, user: UserId) -> Result<bool> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE user_id = ?)")
                .bind(user.0)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;
        Ok(exists == 0)
    }

    async fn insert_client(&self, client: &ClientRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO clients (user_id, first_name, contact, checked, paid_at)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(client.user_id.0)
        .bind(&client.first_name)
        .bind(&client.contact)
        .bind(client.paid_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn receipt_seen(&self, fingerprint: &str) -> Result<bool> {
        let seen: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM receipts WHERE fingerprint = ?)",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(seen != 0)
    }

    async fn record_lottery_entries(&self, entries: &[LotteryEntry]) -> Result<EntryOutcome> {
        let Some(first) = entries.first() else {
            return Ok(EntryOutcome::Recorded);
        };

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let claim = sqlx::query(
            "INSERT INTO receipts (fingerprint, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(&first.receipt_fingerprint)
        .bind(first.user_id.0)
        .bind(first.paid_at)
        .execute(&mut *tx)
        .await;
        match claim {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.map_err(storage)?;
                debug!(user_id = first.user_id.0, "receipt already claimed");
                return Ok(EntryOutcome::ReceiptUsed);
            }
            Err(e) => return Err(storage(e)),
        }

        for entry in entries {
            let inserted = sqlx::query(
                "INSERT INTO lottery_entries
                     (user_id, ticket, receipt_fingerprint, receipt_path, paid_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(entry.user_id.0)
            .bind(i64::from(entry.ticket))
            .bind(&entry.receipt_fingerprint)
            .bind(entry.receipt_path.as_deref())
            .bind(entry.paid_at)
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    tx.rollback().await.map_err(storage)?;
                    debug!(ticket = entry.ticket, "ticket number already taken");
                    return Ok(EntryOutcome::TicketTaken);
                }
                Err(e) => return Err(storage(e)),
            }
        }
        tx.commit().await.map_err(storage)?;
        debug!(count = entries.len(), "lottery entries stored");
        Ok(EntryOutcome::Recorded)
    }

    async fn save_delivery(&self, delivery: &DeliveryRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query(
            "INSERT INTO geo (user_id, latitude, longitude, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 latitude = excluded.latitude,
                 longitude = excluded.longitude,
                 created_at = excluded.created_at",
        )
        .bind(delivery.user_id.0)
        .bind(delivery.latitude)
        .bind(delivery.longitude)
        .bind(delivery.submitted_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        sqlx::query("UPDATE clients SET full_name = ?, address = ? WHERE user_id = ?")
            .bind(&delivery.full_name)
            .bind(&delivery.address)
            .bind(delivery.user_id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn stats(&self) -> Result<RecordStats> {
        Ok(RecordStats {
            registered: self.count("SELECT COUNT(*) FROM registered_users").await?,
            clients: self.count("SELECT COUNT(*) FROM clients").await?,
            clients_with_address: self
                .count("SELECT COUNT(*) FROM clients WHERE address IS NOT NULL AND address <> ''")
                .await?,
            lottery_entries: self.count("SELECT COUNT(*) FROM lottery_entries").await?,
            lottery_participants: self
                .count("SELECT COUNT(DISTINCT user_id) FROM lottery_entries")
                .await?,
        })
    }

    async fn draw_lottery_entry(&self) -> Result<Option<LotteryEntry>> {
        let row = sqlx::query(
            "SELECT user_id, ticket, receipt_fingerprint, receipt_path, paid_at
             FROM lottery_entries ORDER BY RANDOM() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn log_admin_action(&self, action: &AdminAction) -> Result<()> {
        sqlx::query(
            "INSERT INTO admin_logs (admin_id, action, details, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(action.admin_id.0)
        .bind(&action.action)
        .bind(&action.details)
        .bind(action.at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl AudienceProvider for SqliteRecords {
    async fn list_recipients(&self, audience: Audience) -> Result<Vec<UserId>> {
        let sql = match audience {
            Audience::All => "SELECT user_id FROM registered_users ORDER BY user_id",
            Audience::Clients => "SELECT user_id FROM clients ORDER BY user_id",
            Audience::LotteryParticipants => {
                "SELECT DISTINCT user_id FROM lottery_entries ORDER BY user_id"
            }
            Audience::Registered => {
                "SELECT user_id FROM registered_users
                 WHERE user_id NOT IN (SELECT user_id FROM clients)
                 ORDER BY user_id"
            }
        };
        let ids: Vec<i64> = sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(ids.into_iter().map(UserId).collect())
    }
}
