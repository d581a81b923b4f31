//! Raw server payload to canonical [`Message`].
//!
//! The server is not trusted to label images: a payload is an image when it
//! says so, when it already carries a data-URL, or when it looks like bare
//! Base64 (long and free of whitespace). Bare Base64 is repaired with a default
//! JPEG data-URL header so renderers can show it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use shared::{
    domain::{Message, MessageId, RoomId},
    protocol::{RawMessage, CATEGORY_INFO, CATEGORY_NEW_IMAGE, CATEGORY_NEW_MESSAGE},
};
use tracing::debug;

pub const IMAGE_DATA_URL_MARKER: &str = "data:image";
pub const DEFAULT_IMAGE_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";
/// Content longer than this with no whitespace is treated as bare Base64.
pub const RAW_BASE64_MIN_LEN: usize = 500;
pub const UNKNOWN_AUTHOR: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
    RepairedImage(String),
}

pub fn classify_content(content: &str) -> ContentKind {
    if content.starts_with(IMAGE_DATA_URL_MARKER) {
        return ContentKind::Image;
    }

    if looks_like_raw_base64(content) {
        return ContentKind::RepairedImage(format!("{DEFAULT_IMAGE_DATA_URL_PREFIX}{content}"));
    }

    ContentKind::Text
}

/// Longer than the threshold in characters, and nothing but Base64 alphabet
/// (standard or URL-safe), so it carries no whitespace and no non-ASCII text.
fn looks_like_raw_base64(content: &str) -> bool {
    content.chars().count() > RAW_BASE64_MIN_LEN
        && content
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'))
}

/// Data-URL form of `content` when it is an image, `None` for text.
pub fn repair_image(content: &str) -> Option<String> {
    match classify_content(content) {
        ContentKind::Text => None,
        ContentKind::Image => Some(content.to_string()),
        ContentKind::RepairedImage(repaired) => Some(repaired),
    }
}

pub fn image_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// `None` means the payload is connection info, not a message.
pub fn normalize(raw: &RawMessage, fallback_room: &RoomId) -> Option<Message> {
    normalize_at(raw, fallback_room, Utc::now())
}

pub fn normalize_at(
    raw: &RawMessage,
    fallback_room: &RoomId,
    now: DateTime<Utc>,
) -> Option<Message> {
    let category = raw
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if category.is_some_and(|c| c.eq_ignore_ascii_case(CATEGORY_INFO)) {
        return None;
    }
    let declared_image = category.is_some_and(|c| c.eq_ignore_ascii_case(CATEGORY_NEW_IMAGE));

    let photo = match classify_content(&raw.content) {
        ContentKind::Image => Some(raw.content.clone()),
        ContentKind::RepairedImage(repaired) => Some(repaired),
        ContentKind::Text if declared_image => Some(declared_image_url(&raw.content)),
        ContentKind::Text => None,
    };
    let text = if photo.is_some() {
        String::new()
    } else {
        raw.content.clone()
    };

    let is_system = category.is_some_and(|c| {
        !c.eq_ignore_ascii_case(CATEGORY_NEW_MESSAGE) && !c.eq_ignore_ascii_case(CATEGORY_NEW_IMAGE)
    });

    Some(Message {
        id: non_empty(&raw.id)
            .map(MessageId::new)
            .unwrap_or_else(MessageId::generate),
        room_id: non_empty(&raw.room_name)
            .map(RoomId::new)
            .unwrap_or_else(|| fallback_room.clone()),
        author: non_empty(&raw.pseudo)
            .or_else(|| non_empty(&raw.user_id))
            .unwrap_or(UNKNOWN_AUTHOR)
            .to_string(),
        text,
        photo,
        date: raw
            .date_emis
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now),
        is_system,
        pending: false,
    })
}

/// Local placeholder for a send that has not been echoed back yet.
pub fn pending_message(
    room_id: &RoomId,
    author: &str,
    content: &str,
    now: DateTime<Utc>,
) -> Message {
    let photo = repair_image(content);
    Message {
        id: MessageId::pending(),
        room_id: room_id.clone(),
        author: author.to_string(),
        text: if photo.is_some() {
            String::new()
        } else {
            content.to_string()
        },
        photo,
        date: now,
        is_system: false,
        pending: true,
    }
}

fn declared_image_url(content: &str) -> String {
    if content.starts_with("data:") {
        content.to_string()
    } else {
        format!("{DEFAULT_IMAGE_DATA_URL_PREFIX}{content}")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Some(parsed) = raw
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
    {
        return Some(parsed);
    }
    debug!(raw, "normalizer: unparsable timestamp, using receive time");
    None
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
