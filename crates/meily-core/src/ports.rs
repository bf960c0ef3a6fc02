//! Collaborator ports consumed by the conversation machine.
//!
//! Implementations live in adapter crates (`meily-telegram`, `meily-store`, `meily-pdf`);
//! the core only sees these traits.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    conversation::event::DocumentRef,
    domain::UserId,
    receipt::ReceiptVerdict,
    records::{
        AdminAction, ClientRecord, DeliveryRecord, EntryOutcome, LotteryEntry, RecordStats,
        UserProfile,
    },
    state::Audience,
    Result,
};

/// Downloads an uploaded file by reference.
#[async_trait]
pub trait DocumentFetch: Send + Sync {
    async fn fetch_bytes(&self, doc: &DocumentRef) -> Result<Vec<u8>>;
}

/// Turns a receipt PDF into trimmed, non-empty text lines.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_lines(&self, pdf: &[u8]) -> Result<Vec<String>>;
}

pub trait ReceiptValidator: Send + Sync {
    fn validate(&self, lines: &[String], expected_total: u64, expected_payee: &str)
        -> ReceiptVerdict;
}

/// Keeps a copy of every accepted receipt.
#[async_trait]
pub trait ReceiptArchive: Send + Sync {
    async fn store(&self, user: UserId, pdf: &[u8]) -> Result<PathBuf>;
}

#[async_trait]
pub trait AudienceProvider: Send + Sync {
    async fn list_recipients(&self, audience: Audience) -> Result<Vec<UserId>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns `true` when the user was not known before.
    async fn register_user(&self, profile: &UserProfile) -> Result<bool>;

    async fn is_client_unique(&self, user: UserId) -> Result<bool>;
    async fn insert_client(&self, client: &ClientRecord) -> Result<()>;

    async fn receipt_seen(&self, fingerprint: &str) -> Result<bool>;
    /// Claims the batch's receipt and stores every entry, atomically. Ticket numbers are
    /// unique across all users.
    async fn record_lottery_entries(&self, entries: &[LotteryEntry]) -> Result<EntryOutcome>;

    async fn save_delivery(&self, delivery: &DeliveryRecord) -> Result<()>;

    async fn stats(&self) -> Result<RecordStats>;
    async fn draw_lottery_entry(&self) -> Result<Option<LotteryEntry>>;

    async fn log_admin_action(&self, action: &AdminAction) -> Result<()>;
}
