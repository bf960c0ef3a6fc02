//! Permanent records kept about users, clients and lottery entries.

use chrono::{DateTime, Utc};

use crate::domain::UserId;

/// Someone who has talked to the bot at least once.
#[derive(Clone, Debug, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub first_name: String,
    pub registered_at: DateTime<Utc>,
}

/// A paying customer, created when the contact is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientRecord {
    pub user_id: UserId,
    pub first_name: String,
    pub contact: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LotteryEntry {
    pub user_id: UserId,
    pub ticket: u32,
    pub receipt_fingerprint: String,
    pub receipt_path: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// Result of storing one receipt's ticket batch. Nothing is stored unless `Recorded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    Recorded,
    /// Some ticket number already belongs to someone; draw again.
    TicketTaken,
    /// The receipt was claimed first by another batch.
    ReceiptUsed,
}

/// Delivery details submitted through the address form.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryRecord {
    pub user_id: UserId,
    pub full_name: String,
    pub contact: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub registered: u64,
    pub clients: u64,
    pub clients_with_address: u64,
    pub lottery_entries: u64,
    pub lottery_participants: u64,
}

/// Audit line for something an admin did.
#[derive(Clone, Debug, PartialEq)]
pub struct AdminAction {
    pub admin_id: UserId,
    pub action: String,
    pub details: String,
    pub at: DateTime<Utc>,
}
