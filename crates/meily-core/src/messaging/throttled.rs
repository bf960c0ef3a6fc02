//! Outbound pacing in front of the Bot API.
//!
//! Every call takes one slot on a bot-wide schedule. Calls aimed at a chat additionally take
//! a slot on that chat's schedule. Chat schedules are dropped once their slot has passed, so
//! a broadcast to thousands of users leaves nothing behind once it goes quiet.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{port::MessagingPort, types::OutgoingMessage},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Gap between any two calls made by the bot.
    pub bot_spacing: Duration,
    /// Gap between two calls aimed at the same chat.
    pub chat_spacing: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Looser than the broadcast bucket (29/sec) so that one stays binding.
        Self {
            bot_spacing: Duration::from_millis(30),
            chat_spacing: Duration::from_millis(1050),
        }
    }
}

/// Next free instant, bot-wide and per chat.
#[derive(Debug)]
struct Schedule {
    bot_free_at: Instant,
    chat_free_at: HashMap<i64, Instant>,
    next_sweep: Instant,
}

impl Schedule {
    fn new(now: Instant) -> Self {
        Self {
            bot_free_at: now,
            chat_free_at: HashMap::new(),
            next_sweep: now,
        }
    }

    /// Book the earliest slot for a call and return how long the caller must wait for it.
    fn book(&mut self, chat: Option<i64>, cfg: &ThrottleConfig, now: Instant) -> Duration {
        let mut start = self.bot_free_at.max(now);

        if let Some(chat) = chat {
            // A chat whose slot has passed behaves exactly like one never seen.
            if now >= self.next_sweep {
                self.chat_free_at.retain(|_, free_at| *free_at > now);
                self.next_sweep = now + cfg.chat_spacing;
            }
            if let Some(&free_at) = self.chat_free_at.get(&chat) {
                start = start.max(free_at);
            }
            self.chat_free_at.insert(chat, start + cfg.chat_spacing);
        }

        self.bot_free_at = start + cfg.bot_spacing;
        start - now
    }
}

/// MessagingPort decorator that spaces outbound calls.
///
/// Progress edits during a broadcast all target the admin chat, so the per-chat spacing
/// is what keeps them under Telegram's per-chat ceiling.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    schedule: Mutex<Schedule>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            schedule: Mutex::new(Schedule::new(Instant::now())),
        }
    }

    async fn pace(&self, chat: Option<i64>) {
        let wait = self
            .schedule
            .lock()
            .await
            .book(chat, &self.cfg, Instant::now());
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn tracked_chats(&self) -> usize {
        self.schedule.lock().await.chat_free_at.len()
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageRef> {
        self.pace(Some(chat_id.0)).await;
        self.inner.send(chat_id, msg).await
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.pace(Some(msg.chat_id.0)).await;
        self.inner.edit_text(msg, text).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers carry no chat.
        self.pace(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
