//! Message → `EventKind` mapping.

use teloxide::types::Message;

use meily_core::conversation::event::{DocumentRef, EventKind, Media, MenuIntent};

/// Classify a message by its payload. Order matters: a captioned photo is a photo, not text.
pub fn event_kind(msg: &Message) -> EventKind {
    if let Some(text) = msg.text() {
        return text_kind(text);
    }
    let caption = msg.caption().map(str::to_string);

    if let Some(doc) = msg.document() {
        return EventKind::Document(DocumentRef {
            file_id: doc.file.id.clone(),
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(|m| m.to_string()),
            file_size: Some(u64::from(doc.file.size)),
            caption,
        });
    }
    if let Some(sizes) = msg.photo() {
        // Telegram sends every resolution; keep the largest.
        if let Some(largest) = sizes.iter().max_by_key(|p| p.width * p.height) {
            return EventKind::Media(Media::Photo {
                file_id: largest.file.id.clone(),
                caption,
            });
        }
    }
    if let Some(video) = msg.video() {
        return EventKind::Media(Media::Video {
            file_id: video.file.id.clone(),
            caption,
        });
    }
    if let Some(note) = msg.video_note() {
        return EventKind::Media(Media::VideoNote {
            file_id: note.file.id.clone(),
        });
    }
    if let Some(audio) = msg.audio() {
        return EventKind::Media(Media::Audio {
            file_id: audio.file.id.clone(),
            caption,
        });
    }
    if let Some(contact) = msg.contact() {
        return EventKind::Contact {
            phone: contact.phone_number.clone(),
        };
    }
    if let Some(loc) = msg.location() {
        return EventKind::Location {
            latitude: loc.latitude,
            longitude: loc.longitude,
        };
    }

    EventKind::Other {
        kind: other_kind(msg).to_string(),
    }
}

fn other_kind(msg: &Message) -> &'static str {
    if msg.sticker().is_some() {
        "sticker"
    } else if msg.voice().is_some() {
        "voice"
    } else if msg.animation().is_some() {
        "animation"
    } else if msg.poll().is_some() {
        "poll"
    } else {
        "other"
    }
}

/// Commands first, then admin keyboard labels, then free text.
pub fn text_kind(text: &str) -> EventKind {
    if let Some((name, args)) = parse_command(text) {
        return EventKind::Command { name, args };
    }
    match MenuIntent::from_label(text) {
        Some(intent) => EventKind::Menu(intent),
        None => EventKind::Text(text.to_string()),
    }
}

/// `/start@MeilyBot payload` → (`start`, `payload`).
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), args.to_string()))
}
