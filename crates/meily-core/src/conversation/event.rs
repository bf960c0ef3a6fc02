//! Transport-neutral inbound events.
//!
//! The Telegram adapter turns every update into an [`InboundEvent`]. Menu labels are mapped
//! to [`MenuIntent`]s at that boundary, so the machine never compares localized strings.

use crate::{
    domain::{ChatId, UserId},
    state::Audience,
    texts,
};

#[derive(Clone, Debug, PartialEq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub first_name: String,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    Command { name: String, args: String },
    Text(String),
    Menu(MenuIntent),
    Button { callback_id: String, action: ButtonAction },
    Document(DocumentRef),
    Media(Media),
    Contact { phone: String },
    Location { latitude: f64, longitude: f64 },
    /// Anything the bot has no use for (stickers, polls, ...).
    Other { kind: String },
}

impl EventKind {
    pub fn is_command(&self, command: &str) -> bool {
        matches!(self, EventKind::Command { name, .. } if name == command)
    }

    /// Short label for logs.
    pub fn name(&self) -> &str {
        match self {
            EventKind::Command { .. } => "command",
            EventKind::Text(_) => "text",
            EventKind::Menu(_) => "menu",
            EventKind::Button { .. } => "button",
            EventKind::Document(_) => "document",
            EventKind::Media(m) => m.name(),
            EventKind::Contact { .. } => "contact",
            EventKind::Location { .. } => "location",
            EventKind::Other { kind } => kind,
        }
    }
}

/// Reference to an uploaded document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentRef {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
    pub caption: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Media {
    Photo { file_id: String, caption: Option<String> },
    Video { file_id: String, caption: Option<String> },
    VideoNote { file_id: String },
    Audio { file_id: String, caption: Option<String> },
}

impl Media {
    pub fn file_id(&self) -> &str {
        match self {
            Media::Photo { file_id, .. }
            | Media::Video { file_id, .. }
            | Media::VideoNote { file_id }
            | Media::Audio { file_id, .. } => file_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Media::Photo { .. } => "photo",
            Media::Video { .. } => "video",
            Media::VideoNote { .. } => "video_note",
            Media::Audio { .. } => "audio",
        }
    }
}

/// Parsed inline-button callback data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Buy,
    Quantity(u32),
    Unknown(String),
}

pub const BUY_CALLBACK: &str = "buy_cosmetics";
const QUANTITY_PREFIX: &str = "count_";

impl ButtonAction {
    pub fn parse(data: &str) -> Self {
        if data == BUY_CALLBACK {
            return ButtonAction::Buy;
        }
        if let Some(n) = data
            .strip_prefix(QUANTITY_PREFIX)
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            return ButtonAction::Quantity(n);
        }
        ButtonAction::Unknown(data.to_string())
    }

    pub fn quantity_data(n: u32) -> String {
        format!("{QUANTITY_PREFIX}{n}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminIntent {
    Money,
    Registered,
    Clients,
    Lottery,
    Broadcast,
    Gift,
    Statistics,
    Close,
}

impl AdminIntent {
    /// Menu order, two per row.
    pub const MENU: [AdminIntent; 8] = [
        AdminIntent::Money,
        AdminIntent::Registered,
        AdminIntent::Clients,
        AdminIntent::Lottery,
        AdminIntent::Broadcast,
        AdminIntent::Gift,
        AdminIntent::Statistics,
        AdminIntent::Close,
    ];
}

/// What an admin reply-keyboard label means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuIntent {
    Admin(AdminIntent),
    PickAudience(Audience),
    Back,
}

impl MenuIntent {
    /// Map a reply-keyboard label back to its intent. Surrounding whitespace is ignored.
    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(intent) = AdminIntent::MENU
            .into_iter()
            .find(|i| texts::admin_label(*i) == text)
        {
            return Some(MenuIntent::Admin(intent));
        }
        if let Some(audience) = Audience::ALL
            .into_iter()
            .find(|a| texts::audience_label(*a).trim() == text)
        {
            return Some(MenuIntent::PickAudience(audience));
        }
        if text == texts::BACK_LABEL {
            return Some(MenuIntent::Back);
        }
        None
    }
}
