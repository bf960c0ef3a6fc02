use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::OutgoingMessage,
    Result,
};

/// Outbound messenger port.
///
/// Telegram is the only implementation; the conversation machine and the broadcast engine
/// talk to it exclusively through this trait so both can be driven by fakes in tests.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageRef>;
    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
