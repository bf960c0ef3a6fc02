use teloxide::types::CallbackQuery;

use meily_core::{
    conversation::event::{ButtonAction, EventKind, InboundEvent},
    domain::{ChatId, UserId},
};

/// Inline-button presses. Falls back to the presser's private chat when the source
/// message is no longer available.
pub fn callback_event(q: &CallbackQuery) -> InboundEvent {
    let user_id = UserId(q.from.id.0 as i64);
    let chat_id = q
        .message
        .as_ref()
        .map(|m| ChatId(m.chat.id.0))
        .unwrap_or_else(|| ChatId::from(user_id));

    InboundEvent {
        chat_id,
        user_id,
        first_name: q.from.first_name.clone(),
        kind: EventKind::Button {
            callback_id: q.id.clone(),
            action: ButtonAction::parse(q.data.as_deref().unwrap_or_default()),
        },
    }
}
