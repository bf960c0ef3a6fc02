//! Telegram update handlers.
//!
//! Each update is reduced to an `InboundEvent` and handed to the conversation machine.
//! The dispatcher already runs updates of one chat in order.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, info};

use meily_core::{
    conversation::event::InboundEvent,
    domain::{ChatId, UserId},
};

use crate::router::AppState;

mod callback;
mod delivery;
mod message;

pub use callback::callback_event;
pub use delivery::delivery_form;
pub use message::{event_kind, parse_command, text_kind};

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let event = callback_event(&q);
    dispatch(event, &state).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Channel posts and service messages have no sender.
    let Some(user) = msg.from() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);

    if let teloxide::types::MessageKind::WebAppData(teloxide::types::MessageWebAppData {
        web_app_data: web_app,
    }) = &msg.kind
    {
        // The machine replies to the buyer and logs on every rejection.
        match delivery_form(user_id, &web_app.data) {
            Ok(form) => {
                if state.machine.complete_delivery(form).await.is_ok() {
                    info!(user_id = user_id.0, "delivery form accepted");
                }
            }
            Err(e) => state.machine.reject_delivery(user_id, &e).await,
        }
        return Ok(());
    }

    let event = InboundEvent {
        chat_id: ChatId(msg.chat.id.0),
        user_id,
        first_name: user.first_name.clone(),
        kind: event_kind(&msg),
    };
    dispatch(event, &state).await;
    Ok(())
}

async fn dispatch(event: InboundEvent, state: &AppState) {
    let user_id = event.user_id.0;
    let kind = event.kind.name().to_string();
    let next = state.machine.handle(event).await;
    debug!(user_id, kind, phase = ?next.phase, "update handled");
}
