//! Per-user conversation state machine.
//!
//! Every inbound event is routed on the user's stored [`Phase`]. Phase handlers perform their
//! side effects through the injected ports and return a [`Transition`]; the machine then
//! persists the outcome. Storage trouble never blocks a reply: a failed read is treated as a
//! fresh `Start` conversation, a failed write is logged and the next event sees the old state.

mod admin;
mod delivery;
pub mod event;
mod purchase;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{BroadcastEngine, BroadcastSettings},
    config::Config,
    domain::{ChatId, UserId},
    messaging::{port::MessagingPort, types::OutgoingMessage},
    ports::{
        AudienceProvider, DocumentFetch, ReceiptArchive, ReceiptValidator, RecordStore,
        TextExtractor,
    },
    records::UserProfile,
    state::{ConversationState, Phase, StateStore},
    texts,
};

pub use delivery::DeliveryForm;
use event::{EventKind, InboundEvent, Media};

/// Everything the machine talks to.
pub struct Collaborators {
    pub states: Arc<dyn StateStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub fetch: Arc<dyn DocumentFetch>,
    pub extractor: Arc<dyn TextExtractor>,
    pub validator: Arc<dyn ReceiptValidator>,
    pub archive: Arc<dyn ReceiptArchive>,
    pub records: Arc<dyn RecordStore>,
    pub audiences: Arc<dyn AudienceProvider>,
}

/// What a phase handler decided.
#[derive(Debug)]
enum Transition {
    /// Keep the current state.
    Stay,
    Move(ConversationState),
    /// Forget the conversation; the next event starts from `Start`.
    Reset,
}

/// Outcome of reading the stored state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Loaded {
    Found,
    Absent,
    Unavailable,
}

pub struct ConversationMachine {
    cfg: Arc<Config>,
    states: Arc<dyn StateStore>,
    messenger: Arc<dyn MessagingPort>,
    fetch: Arc<dyn DocumentFetch>,
    extractor: Arc<dyn TextExtractor>,
    validator: Arc<dyn ReceiptValidator>,
    archive: Arc<dyn ReceiptArchive>,
    records: Arc<dyn RecordStore>,
    audiences: Arc<dyn AudienceProvider>,
    broadcaster: BroadcastEngine,
    shutdown: CancellationToken,
}

impl ConversationMachine {
    /// `shutdown` is handed to every broadcast so a stopping process abandons pending sends.
    pub fn new(cfg: Arc<Config>, ports: Collaborators, shutdown: CancellationToken) -> Self {
        let broadcaster =
            BroadcastEngine::new(ports.messenger.clone(), BroadcastSettings::from_config(&cfg));
        Self {
            cfg,
            states: ports.states,
            messenger: ports.messenger,
            fetch: ports.fetch,
            extractor: ports.extractor,
            validator: ports.validator,
            archive: ports.archive,
            records: ports.records,
            audiences: ports.audiences,
            broadcaster,
            shutdown,
        }
    }

    /// Process one inbound event and return the state now in effect for the user.
    pub async fn handle(&self, event: InboundEvent) -> ConversationState {
        self.register(&event).await;

        if let EventKind::Button { callback_id, .. } = &event.kind {
            if let Err(e) = self.messenger.answer_callback_query(callback_id, None).await {
                debug!(user_id = event.user_id.0, error = %e, "failed to answer callback");
            }
        }

        let (state, loaded) = self.load(event.user_id).await;
        let is_admin = self.cfg.is_admin(event.user_id.0);

        debug!(
            user_id = event.user_id.0,
            phase = ?state.phase,
            event = event.kind.name(),
            "inbound event"
        );

        if is_admin && state.phase != Phase::AdminBroadcastCompose {
            if let EventKind::Media(media @ (Media::Photo { .. } | Media::Video { .. })) =
                &event.kind
            {
                self.reply(
                    event.chat_id,
                    texts::file_id_echo(media.name(), media.file_id()),
                )
                .await;
                return self.settle(event.user_id, state, loaded, Transition::Stay).await;
            }
        }

        let transition = if is_admin && event.kind.is_command("admin") {
            self.open_admin_panel(&event).await
        } else if state.phase.is_admin() && !is_admin {
            warn!(
                user_id = event.user_id.0,
                phase = ?state.phase,
                "non-admin found in an admin phase; resetting"
            );
            self.reply(event.chat_id, texts::promo(&self.cfg)).await;
            Transition::Reset
        } else {
            match state.phase {
                Phase::Start => self.on_start(&event).await,
                Phase::AwaitingQuantity => self.on_quantity(&event).await,
                Phase::AwaitingPayment => self.on_payment(&event, &state).await,
                Phase::AwaitingContact => self.on_contact(&event, &state).await,
                Phase::AdminPanel => self.on_admin_panel(&event).await,
                Phase::AdminBroadcastCompose => self.on_broadcast_compose(&event, &state).await,
            }
        };

        self.settle(event.user_id, state, loaded, transition).await
    }

    async fn register(&self, event: &InboundEvent) {
        let profile = UserProfile {
            user_id: event.user_id,
            first_name: event.first_name.clone(),
            registered_at: Utc::now(),
        };
        match self.records.register_user(&profile).await {
            Ok(true) => info!(user_id = event.user_id.0, "new user registered"),
            Ok(false) => {}
            Err(e) => warn!(user_id = event.user_id.0, error = %e, "failed to register user"),
        }
    }

    async fn load(&self, user: UserId) -> (ConversationState, Loaded) {
        match self.states.get(user).await {
            Ok(Some(state)) => (state, Loaded::Found),
            Ok(None) => (ConversationState::default(), Loaded::Absent),
            Err(e) => {
                warn!(user_id = user.0, error = %e, "state store unavailable; using default state");
                (ConversationState::default(), Loaded::Unavailable)
            }
        }
    }

    /// Persist the decision. Write failures are logged and swallowed: the reply has already
    /// gone out, and the next event will observe whatever the store still holds.
    async fn settle(
        &self,
        user: UserId,
        current: ConversationState,
        loaded: Loaded,
        transition: Transition,
    ) -> ConversationState {
        match transition {
            Transition::Stay => {
                // A fresh user gets a record; an unreadable one is left alone so a real
                // stored state is never overwritten by the fallback.
                if loaded == Loaded::Absent {
                    if let Err(e) = self.states.put(user, &current).await {
                        warn!(user_id = user.0, error = %e, "failed to store initial state");
                    }
                }
                current
            }
            Transition::Move(next) => {
                if let Err(e) = self.states.put(user, &next).await {
                    warn!(
                        user_id = user.0,
                        phase = ?next.phase,
                        error = %e,
                        "failed to store state"
                    );
                }
                next
            }
            Transition::Reset => {
                if let Err(e) = self.states.delete(user).await {
                    warn!(user_id = user.0, error = %e, "failed to reset state");
                }
                ConversationState::default()
            }
        }
    }

    /// Best-effort send.
    async fn reply(&self, chat_id: ChatId, msg: OutgoingMessage) {
        if let Err(e) = self.messenger.send(chat_id, msg).await {
            warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
        }
    }
}
