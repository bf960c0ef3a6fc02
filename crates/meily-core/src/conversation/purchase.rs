//! Buyer flow: promo, quantity, receipt and contact.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{
    event::{ButtonAction, DocumentRef, EventKind, InboundEvent},
    ConversationMachine, Transition,
};
use crate::{
    domain::UserId,
    lottery::{draw_tickets, tickets_for_quantity},
    messaging::types::OutgoingMessage,
    receipt::{self, ReceiptVerdict},
    records::{ClientRecord, EntryOutcome, LotteryEntry},
    state::{ConversationState, Phase},
    texts, Result,
};

const TICKET_DRAW_ATTEMPTS: usize = 5;

enum Issue {
    Tickets(Vec<u32>),
    ReceiptUsed,
    Exhausted,
}

impl ConversationMachine {
    pub(super) async fn on_start(&self, event: &InboundEvent) -> Transition {
        match &event.kind {
            EventKind::Button {
                action: ButtonAction::Buy,
                ..
            } => {
                self.reply(event.chat_id, texts::quantity_menu(self.cfg.max_quantity))
                    .await;
                Transition::Move(ConversationState::in_phase(Phase::AwaitingQuantity))
            }
            _ => {
                self.reply(event.chat_id, texts::promo(&self.cfg)).await;
                Transition::Stay
            }
        }
    }

    pub(super) async fn on_quantity(&self, event: &InboundEvent) -> Transition {
        match &event.kind {
            EventKind::Button {
                action: ButtonAction::Quantity(n),
                ..
            } if (1..=self.cfg.max_quantity).contains(n) => {
                let total = self.cfg.order_total(*n);
                info!(user_id = event.user_id.0, quantity = n, total, "quantity chosen");
                self.reply(
                    event.chat_id,
                    texts::payment_instructions(total, &self.cfg.payment_url),
                )
                .await;
                Transition::Move(ConversationState {
                    phase: Phase::AwaitingPayment,
                    quantity: *n,
                    ..ConversationState::default()
                })
            }
            _ => {
                self.reply(event.chat_id, texts::quantity_menu(self.cfg.max_quantity))
                    .await;
                Transition::Stay
            }
        }
    }

    pub(super) async fn on_payment(
        &self,
        event: &InboundEvent,
        state: &ConversationState,
    ) -> Transition {
        let total = self.cfg.order_total(state.quantity);
        match &event.kind {
            EventKind::Document(doc) => self.check_receipt(event, doc, state, total).await,
            _ => {
                self.reply(
                    event.chat_id,
                    texts::payment_instructions(total, &self.cfg.payment_url),
                )
                .await;
                Transition::Stay
            }
        }
    }

    /// Extension, size, download, duplicate check, extraction, validation, archive, tickets.
    /// Any refusal keeps the user in `AwaitingPayment` with `is_paid` untouched.
    async fn check_receipt(
        &self,
        event: &InboundEvent,
        doc: &DocumentRef,
        state: &ConversationState,
        expected_total: u64,
    ) -> Transition {
        let user = event.user_id;
        let chat = event.chat_id;

        if !receipt::is_pdf_name(doc.file_name.as_deref()) {
            self.reply(chat, OutgoingMessage::text(texts::ONLY_PDF))
                .await;
            return Transition::Stay;
        }
        let limit = self.cfg.max_receipt_bytes;
        if doc.file_size.is_some_and(|size| size > limit) {
            self.reply(chat, OutgoingMessage::text(texts::RECEIPT_TOO_LARGE))
                .await;
            return Transition::Stay;
        }

        let pdf = match self.fetch.fetch_bytes(doc).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(user_id = user.0, error = %e, "receipt download failed");
                self.reply(chat, OutgoingMessage::text(texts::TECHNICAL_ERROR))
                    .await;
                return Transition::Stay;
            }
        };
        if pdf.len() as u64 > limit {
            self.reply(chat, OutgoingMessage::text(texts::RECEIPT_TOO_LARGE))
                .await;
            return Transition::Stay;
        }

        let fingerprint = receipt::fingerprint(&pdf);
        match self.records.receipt_seen(&fingerprint).await {
            Ok(false) => {}
            Ok(true) => {
                info!(user_id = user.0, %fingerprint, "receipt reused");
                self.reply(chat, OutgoingMessage::text(texts::RECEIPT_REUSED))
                    .await;
                return Transition::Stay;
            }
            Err(e) => {
                warn!(user_id = user.0, error = %e, "receipt lookup failed");
                self.reply(chat, OutgoingMessage::text(texts::TECHNICAL_ERROR))
                    .await;
                return Transition::Stay;
            }
        }

        let lines = match self.extractor.extract_lines(&pdf).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(user_id = user.0, error = %e, "receipt text extraction failed");
                self.reply(chat, OutgoingMessage::text(texts::INVALID_RECEIPT))
                    .await;
                return Transition::Stay;
            }
        };

        match self
            .validator
            .validate(&lines, expected_total, &self.cfg.payee_bin)
        {
            ReceiptVerdict::Accepted { amount } => {
                info!(user_id = user.0, amount, "receipt accepted");
            }
            ReceiptVerdict::Rejected(reason) => {
                info!(user_id = user.0, expected_total, %reason, "receipt rejected");
                self.reply(chat, OutgoingMessage::text(texts::INVALID_RECEIPT))
                    .await;
                return Transition::Stay;
            }
        }

        let receipt_path = match self.archive.store(user, &pdf).await {
            Ok(path) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(user_id = user.0, error = %e, "failed to archive receipt");
                None
            }
        };

        let tickets = match self
            .issue_tickets(user, state.quantity, &fingerprint, receipt_path)
            .await
        {
            Ok(Issue::Tickets(tickets)) => tickets,
            Ok(Issue::ReceiptUsed) => {
                info!(user_id = user.0, %fingerprint, "receipt claimed concurrently");
                self.reply(chat, OutgoingMessage::text(texts::RECEIPT_REUSED))
                    .await;
                return Transition::Stay;
            }
            Ok(Issue::Exhausted) => {
                error!(user_id = user.0, "no free ticket numbers after redraws");
                self.reply(chat, OutgoingMessage::text(texts::TECHNICAL_ERROR))
                    .await;
                return Transition::Stay;
            }
            Err(e) => {
                error!(user_id = user.0, error = %e, "failed to record lottery entries");
                self.reply(chat, OutgoingMessage::text(texts::TECHNICAL_ERROR))
                    .await;
                return Transition::Stay;
            }
        };

        info!(user_id = user.0, tickets = tickets.len(), "lottery tickets issued");
        self.reply(chat, texts::tickets_issued(&tickets)).await;

        Transition::Move(ConversationState {
            phase: Phase::AwaitingContact,
            is_paid: true,
            ..state.clone()
        })
    }

    /// Draw and store the batch, drawing again while a number is already taken.
    async fn issue_tickets(
        &self,
        user: UserId,
        quantity: u32,
        fingerprint: &str,
        receipt_path: Option<String>,
    ) -> Result<Issue> {
        for attempt in 1..=TICKET_DRAW_ATTEMPTS {
            let tickets = {
                let mut rng = rand::thread_rng();
                draw_tickets(tickets_for_quantity(quantity), &mut rng)
            };
            let paid_at = Utc::now();
            let entries: Vec<LotteryEntry> = tickets
                .iter()
                .map(|&ticket| LotteryEntry {
                    user_id: user,
                    ticket,
                    receipt_fingerprint: fingerprint.to_string(),
                    receipt_path: receipt_path.clone(),
                    paid_at,
                })
                .collect();

            match self.records.record_lottery_entries(&entries).await? {
                EntryOutcome::Recorded => return Ok(Issue::Tickets(tickets)),
                EntryOutcome::ReceiptUsed => return Ok(Issue::ReceiptUsed),
                EntryOutcome::TicketTaken => {
                    debug!(user_id = user.0, attempt, "ticket number taken; drawing again");
                }
            }
        }
        Ok(Issue::Exhausted)
    }

    pub(super) async fn on_contact(
        &self,
        event: &InboundEvent,
        state: &ConversationState,
    ) -> Transition {
        let EventKind::Contact { phone } = &event.kind else {
            debug!(
                user_id = event.user_id.0,
                contact = state.contact.as_deref().unwrap_or("-"),
                "contact still missing"
            );
            self.reply(event.chat_id, texts::contact_reprompt()).await;
            return Transition::Stay;
        };

        let user = event.user_id;
        match self.records.is_client_unique(user).await {
            Ok(true) => {
                let client = ClientRecord {
                    user_id: user,
                    first_name: event.first_name.clone(),
                    contact: phone.clone(),
                    paid_at: Utc::now(),
                };
                match self.records.insert_client(&client).await {
                    Ok(()) => info!(user_id = user.0, "client recorded"),
                    Err(e) => warn!(user_id = user.0, error = %e, "failed to record client"),
                }
            }
            Ok(false) => debug!(user_id = user.0, "client already recorded"),
            Err(e) => warn!(user_id = user.0, error = %e, "client lookup failed"),
        }

        self.reply(event.chat_id, texts::delivery_prompt(&self.cfg))
            .await;

        Transition::Move(ConversationState {
            contact: Some(phone.clone()),
            ..state.clone()
        })
    }
}
