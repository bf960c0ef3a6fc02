/// What a single outgoing message carries.
///
/// Media are referenced by platform file id; the bot never re-uploads bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    Text(String),
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    Video {
        file_id: String,
        caption: Option<String>,
    },
    Document {
        file_id: String,
        caption: Option<String>,
    },
    VideoNote {
        file_id: String,
    },
    Audio {
        file_id: String,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
}

impl Content {
    /// Text or caption, if any. Mostly useful for logs and tests.
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(t),
            Content::Photo { caption, .. }
            | Content::Video { caption, .. }
            | Content::Document { caption, .. }
            | Content::Audio { caption, .. } => caption.as_deref(),
            Content::VideoNote { .. } | Content::Location { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub content: Content,
    pub markup: Option<ReplyMarkup>,
}

impl OutgoingMessage {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            markup: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Content::Text(text.into()))
    }

    pub fn with_markup(mut self, markup: ReplyMarkup) -> Self {
        self.markup = Some(markup);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReplyMarkup {
    Inline(InlineKeyboard),
    Reply(ReplyKeyboard),
    Remove,
}

/// Inline keyboard attached to a message, laid out in rows.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonTarget,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ButtonTarget {
    Callback(String),
    Url(String),
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonTarget::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonTarget::Url(url.into()),
        }
    }
}

impl InlineKeyboard {
    pub fn single(button: InlineButton) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    /// Lay buttons out `per_row` at a time.
    pub fn grid(buttons: Vec<InlineButton>, per_row: usize) -> Self {
        let per_row = per_row.max(1);
        let mut rows = Vec::new();
        let mut row = Vec::with_capacity(per_row);
        for b in buttons {
            row.push(b);
            if row.len() == per_row {
                rows.push(std::mem::take(&mut row));
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
        Self { rows }
    }
}

/// Custom reply keyboard (replaces the user's on-screen keyboard).
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<KeyButton>>,
    pub resize: bool,
    pub one_time: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyButton {
    pub label: String,
    pub request_contact: bool,
}

impl KeyButton {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            request_contact: false,
        }
    }

    pub fn contact(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            request_contact: true,
        }
    }
}
