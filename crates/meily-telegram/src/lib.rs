//! Telegram adapter (teloxide).
//!
//! Implements the core's `MessagingPort` and `DocumentFetch` over the Bot API and maps
//! incoming updates onto `InboundEvent`s.

use async_trait::async_trait;

use teloxide::{
    net::Download,
    prelude::*,
    requests::HasPayload,
    types::{
        ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton,
        KeyboardMarkup, KeyboardRemove,
    },
};

use tokio::time::sleep;
use tracing::debug;

pub mod handlers;
pub mod router;

use meily_core::{
    conversation::event::DocumentRef,
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonTarget, Content, OutgoingMessage, ReplyMarkup},
    },
    ports::DocumentFetch,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Translate the core's markup into the Bot API's.
pub fn tg_markup(markup: ReplyMarkup) -> Result<teloxide::types::ReplyMarkup> {
    Ok(match markup {
        ReplyMarkup::Inline(kb) => {
            let mut rows = Vec::with_capacity(kb.rows.len());
            for row in kb.rows {
                let mut buttons = Vec::with_capacity(row.len());
                for b in row {
                    buttons.push(match b.action {
                        ButtonTarget::Callback(data) => InlineKeyboardButton::callback(b.label, data),
                        ButtonTarget::Url(url) => InlineKeyboardButton::url(
                            b.label,
                            url.parse()
                                .map_err(|e| Error::Validation(format!("bad button url {url}: {e}")))?,
                        ),
                    });
                }
                rows.push(buttons);
            }
            teloxide::types::ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows))
        }
        ReplyMarkup::Reply(kb) => {
            let rows: Vec<Vec<KeyboardButton>> = kb
                .rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|b| {
                            let button = KeyboardButton::new(b.label);
                            if b.request_contact {
                                button.request(ButtonRequest::Contact)
                            } else {
                                button
                            }
                        })
                        .collect()
                })
                .collect();
            teloxide::types::ReplyMarkup::Keyboard(
                KeyboardMarkup::new(rows)
                    .resize_keyboard(kb.resize)
                    .one_time_keyboard(kb.one_time),
            )
        }
        ReplyMarkup::Remove => teloxide::types::ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    })
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageRef> {
        let chat = Self::tg_chat(chat_id);
        let markup = msg.markup.map(tg_markup).transpose()?;

        let sent = match msg.content {
            Content::Text(text) => {
                self.with_retry(|| {
                    let mut req = self.bot.send_message(chat, text.clone());
                    req.payload_mut().reply_markup = markup.clone();
                    req
                })
                .await?
            }
            Content::Photo { file_id, caption } => {
                self.with_retry(|| {
                    let mut req = self.bot.send_photo(chat, InputFile::file_id(file_id.clone()));
                    let p = req.payload_mut();
                    p.caption = caption.clone();
                    p.reply_markup = markup.clone();
                    req
                })
                .await?
            }
            Content::Video { file_id, caption } => {
                self.with_retry(|| {
                    let mut req = self.bot.send_video(chat, InputFile::file_id(file_id.clone()));
                    let p = req.payload_mut();
                    p.caption = caption.clone();
                    p.reply_markup = markup.clone();
                    req
                })
                .await?
            }
            Content::Document { file_id, caption } => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_document(chat, InputFile::file_id(file_id.clone()));
                    let p = req.payload_mut();
                    p.caption = caption.clone();
                    p.reply_markup = markup.clone();
                    req
                })
                .await?
            }
            Content::VideoNote { file_id } => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_video_note(chat, InputFile::file_id(file_id.clone()));
                    req.payload_mut().reply_markup = markup.clone();
                    req
                })
                .await?
            }
            Content::Audio { file_id, caption } => {
                self.with_retry(|| {
                    let mut req = self.bot.send_audio(chat, InputFile::file_id(file_id.clone()));
                    let p = req.payload_mut();
                    p.caption = caption.clone();
                    p.reply_markup = markup.clone();
                    req
                })
                .await?
            }
            Content::Location {
                latitude,
                longitude,
            } => {
                self.with_retry(|| {
                    let mut req = self.bot.send_location(chat, latitude, longitude);
                    req.payload_mut().reply_markup = markup.clone();
                    req
                })
                .await?
            }
        };

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.id.0),
        })
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot.edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg.message_id),
                text.to_string(),
            )
        })
        .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentFetch for TelegramMessenger {
    async fn fetch_bytes(&self, doc: &DocumentRef) -> Result<Vec<u8>> {
        let file = self
            .with_retry(|| self.bot.get_file(doc.file_id.clone()))
            .await?;

        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| Error::External(format!("telegram download failed: {e}")))?;

        debug!(file_id = %doc.file_id, bytes = buf.len(), "document downloaded");
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meily_core::messaging::types::{InlineButton, InlineKeyboard, KeyButton, ReplyKeyboard};

    #[test]
    fn inline_markup_keeps_layout_and_targets() {
        let kb = InlineKeyboard {
            rows: vec![
                vec![
                    InlineButton::callback("1", "count_1"),
                    InlineButton::callback("2", "count_2"),
                ],
                vec![InlineButton::url("Kaspi", "https://pay.kaspi.kz/pay/ndy27jz5")],
            ],
        };
        let teloxide::types::ReplyMarkup::InlineKeyboard(markup) =
            tg_markup(ReplyMarkup::Inline(kb)).unwrap()
        else {
            panic!("expected inline keyboard");
        };
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "Kaspi");
    }

    #[test]
    fn malformed_url_is_rejected() {
        let kb = InlineKeyboard::single(InlineButton::url("x", "not a url"));
        assert!(matches!(
            tg_markup(ReplyMarkup::Inline(kb)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn contact_button_requests_the_phone_number() {
        let kb = ReplyKeyboard {
            rows: vec![vec![KeyButton::contact("share"), KeyButton::new("plain")]],
            resize: true,
            one_time: true,
        };
        let teloxide::types::ReplyMarkup::Keyboard(markup) =
            tg_markup(ReplyMarkup::Reply(kb)).unwrap()
        else {
            panic!("expected reply keyboard");
        };
        let row = &markup.keyboard[0];
        assert_eq!(row[0].request, Some(ButtonRequest::Contact));
        assert_eq!(row[1].request, None);
    }
}
