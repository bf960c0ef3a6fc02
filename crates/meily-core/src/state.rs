//! Per-user conversation state and the store it lives in.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::UserId, Result};

/// Which input the conversation expects next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Start,
    AwaitingQuantity,
    AwaitingPayment,
    AwaitingContact,
    AdminPanel,
    AdminBroadcastCompose,
}

impl Phase {
    pub fn is_admin(self) -> bool {
        matches!(self, Phase::AdminPanel | Phase::AdminBroadcastCompose)
    }
}

/// Named recipient group for a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    All,
    Clients,
    LotteryParticipants,
    Registered,
}

impl Audience {
    pub const ALL: [Audience; 4] = [
        Audience::All,
        Audience::Clients,
        Audience::LotteryParticipants,
        Audience::Registered,
    ];

    /// Stable identifier used in logs and the admin action log.
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::All => "all",
            Audience::Clients => "clients",
            Audience::LotteryParticipants => "lottery",
            Audience::Registered => "registered",
        }
    }
}

/// One record per user. Absence means the default (`Start`, quantity 0, unpaid).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub phase: Phase,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_audience: Option<Audience>,
}

impl ConversationState {
    pub fn in_phase(phase: Phase) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}

/// Durable mapping from user to conversation state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, user: UserId) -> Result<Option<ConversationState>>;
    async fn put(&self, user: UserId, state: &ConversationState) -> Result<()>;
    async fn delete(&self, user: UserId) -> Result<()>;
}

/// Process-local store; state is lost on restart.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<HashMap<UserId, ConversationState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, user: UserId) -> Result<Option<ConversationState>> {
        Ok(self.inner.lock().await.get(&user).cloned())
    }

    async fn put(&self, user: UserId, state: &ConversationState) -> Result<()> {
        self.inner.lock().await.insert(user, state.clone());
        Ok(())
    }

    async fn delete(&self, user: UserId) -> Result<()> {
        self.inner.lock().await.remove(&user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_json_omits_unset_optionals() {
        let st = ConversationState {
            phase: Phase::AwaitingPayment,
            quantity: 2,
            ..ConversationState::default()
        };
        let json = serde_json::to_string(&st).unwrap();
        assert_eq!(json, r#"{"phase":"awaiting_payment","quantity":2,"is_paid":false}"#);

        let back: ConversationState = serde_json::from_str(r#"{"phase":"admin_broadcast_compose","broadcast_audience":"lottery_participants"}"#).unwrap();
        assert_eq!(back.phase, Phase::AdminBroadcastCompose);
        assert_eq!(back.broadcast_audience, Some(Audience::LotteryParticipants));
        assert_eq!(back.quantity, 0);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_and_deletes() {
        let store = InMemoryStateStore::new();
        let user = UserId(5);
        assert!(store.get(user).await.unwrap().is_none());

        store
            .put(user, &ConversationState::in_phase(Phase::AwaitingQuantity))
            .await
            .unwrap();
        assert_eq!(
            store.get(user).await.unwrap().map(|s| s.phase),
            Some(Phase::AwaitingQuantity)
        );

        store.delete(user).await.unwrap();
        assert!(store.is_empty().await);
    }
}
