//! Admin panel and broadcast composition.

use chrono::{Local, Utc};
use tracing::{error, info, warn};

use super::{
    event::{AdminIntent, EventKind, InboundEvent, MenuIntent},
    ConversationMachine, Transition,
};
use crate::{
    broadcast::{BroadcastJob, BroadcastOutcome, BroadcastPayload},
    domain::UserId,
    lottery::TICKETS_PER_UNIT,
    messaging::types::OutgoingMessage,
    records::AdminAction,
    state::{Audience, ConversationState, Phase},
    texts, Result,
};

impl ConversationMachine {
    pub(super) async fn open_admin_panel(&self, event: &InboundEvent) -> Transition {
        info!(user_id = event.user_id.0, "admin panel opened");
        self.reply(event.chat_id, texts::admin_menu(texts::ADMIN_WELCOME))
            .await;
        Transition::Move(ConversationState::in_phase(Phase::AdminPanel))
    }

    pub(super) async fn on_admin_panel(&self, event: &InboundEvent) -> Transition {
        let EventKind::Menu(MenuIntent::Admin(intent)) = &event.kind else {
            self.reply(event.chat_id, texts::admin_menu(texts::ADMIN_UNKNOWN))
                .await;
            return Transition::Stay;
        };

        match intent {
            AdminIntent::Broadcast => {
                let mut counts = Vec::with_capacity(Audience::ALL.len());
                for audience in Audience::ALL {
                    let count = match self.audiences.list_recipients(audience).await {
                        Ok(ids) => Some(ids.len()),
                        Err(e) => {
                            warn!(audience = audience.as_str(), error = %e, "audience count failed");
                            None
                        }
                    };
                    counts.push((audience, count));
                }
                self.reply(event.chat_id, texts::broadcast_menu(&counts))
                    .await;
                Transition::Move(ConversationState::in_phase(Phase::AdminBroadcastCompose))
            }
            AdminIntent::Close => {
                info!(user_id = event.user_id.0, "admin panel closed");
                self.reply(event.chat_id, texts::admin_closed()).await;
                Transition::Reset
            }
            report => {
                let text = match self.admin_report(event.user_id, *report).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(user_id = event.user_id.0, error = %e, "admin report failed");
                        texts::STATS_FAILED.to_string()
                    }
                };
                self.reply(event.chat_id, texts::admin_menu(&text)).await;
                Transition::Stay
            }
        }
    }

    async fn admin_report(&self, admin: UserId, intent: AdminIntent) -> Result<String> {
        if intent == AdminIntent::Gift {
            let winner = self.records.draw_lottery_entry().await?;
            if let Some(entry) = &winner {
                self.audit(
                    admin,
                    "gift",
                    format!("ticket={} user={}", entry.ticket, entry.user_id.0),
                )
                .await;
            }
            return Ok(texts::gift_draw(winner.as_ref()));
        }

        let stats = self.records.stats().await?;
        Ok(match intent {
            AdminIntent::Money => {
                let units = stats.lottery_entries / u64::from(TICKETS_PER_UNIT);
                texts::money_stats(units, units.saturating_mul(self.cfg.unit_cost))
            }
            AdminIntent::Registered => texts::registered_stats(stats.registered),
            AdminIntent::Clients => {
                texts::clients_stats(stats.clients, stats.clients_with_address)
            }
            AdminIntent::Lottery => {
                texts::lottery_stats(stats.lottery_entries, stats.lottery_participants)
            }
            _ => texts::overall_stats(&stats, Local::now()),
        })
    }

    pub(super) async fn on_broadcast_compose(
        &self,
        event: &InboundEvent,
        state: &ConversationState,
    ) -> Transition {
        let payload = match &event.kind {
            EventKind::Menu(MenuIntent::PickAudience(audience)) => {
                self.reply(event.chat_id, texts::compose_prompt(*audience))
                    .await;
                return Transition::Move(ConversationState {
                    broadcast_audience: Some(*audience),
                    ..ConversationState::in_phase(Phase::AdminBroadcastCompose)
                });
            }
            EventKind::Menu(MenuIntent::Back) => {
                self.reply(event.chat_id, texts::admin_menu(texts::ADMIN_WELCOME))
                    .await;
                return Transition::Move(ConversationState::in_phase(Phase::AdminPanel));
            }
            // A menu label typed while composing is just text to send.
            EventKind::Menu(MenuIntent::Admin(intent)) => {
                BroadcastPayload::Text(texts::admin_label(*intent).to_string())
            }
            other => BroadcastPayload::from_event(other),
        };

        let Some(audience) = state.broadcast_audience else {
            self.reply(event.chat_id, texts::pick_audience_first())
                .await;
            return Transition::Stay;
        };

        let recipients = match self.audiences.list_recipients(audience).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(audience = audience.as_str(), error = %e, "failed to load audience");
                self.reply(
                    event.chat_id,
                    OutgoingMessage::text(texts::audience_load_failed(&e.to_string())),
                )
                .await;
                return Transition::Stay;
            }
        };

        let job = BroadcastJob {
            audience,
            recipients,
            payload,
        };
        match self.broadcaster.run(event.chat_id, job, &self.shutdown).await {
            Ok(BroadcastOutcome::Completed(summary)) => {
                self.audit(
                    event.user_id,
                    "broadcast",
                    format!(
                        "audience={} total={} succeeded={} failed={} cancelled={}",
                        audience.as_str(),
                        summary.total,
                        summary.succeeded,
                        summary.failed,
                        summary.cancelled
                    ),
                )
                .await;
            }
            Ok(BroadcastOutcome::NoRecipients) => {
                info!(audience = audience.as_str(), "broadcast skipped: no recipients");
            }
            Err(e) => {
                error!(audience = audience.as_str(), error = %e, "broadcast not started");
                self.reply(
                    event.chat_id,
                    OutgoingMessage::text(texts::BROADCAST_NOT_STARTED),
                )
                .await;
            }
        }

        self.reply(event.chat_id, texts::admin_menu(texts::ADMIN_WELCOME))
            .await;
        Transition::Move(ConversationState::in_phase(Phase::AdminPanel))
    }

    async fn audit(&self, admin: UserId, action: &str, details: String) {
        let entry = AdminAction {
            admin_id: admin,
            action: action.to_string(),
            details,
            at: Utc::now(),
        };
        if let Err(e) = self.records.log_admin_action(&entry).await {
            warn!(user_id = admin.0, action, error = %e, "failed to log admin action");
        }
    }
}
