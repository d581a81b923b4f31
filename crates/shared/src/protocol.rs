use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{Room, RoomId};

/// Connection bookkeeping pushed by the server; never a chat message.
pub const CATEGORY_INFO: &str = "INFO";
pub const CATEGORY_NEW_IMAGE: &str = "NEW_IMAGE";
pub const CATEGORY_NEW_MESSAGE: &str = "NEW_MESSAGE";

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Inbound `message` payload exactly as the server sends it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub pseudo: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_emis: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub room_name: Option<String>,
}

/// Accepts strings, numbers and booleans; anything else reads as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}

fn lenient_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    JoinRoom {
        pseudo: String,
        #[serde(rename = "roomName")]
        room_name: String,
    },
    Send {
        content: String,
        #[serde(rename = "roomName")]
        room_name: String,
    },
}

impl OutboundEvent {
    pub fn join(pseudo: impl Into<String>, room_id: &RoomId) -> Self {
        Self::JoinRoom {
            pseudo: pseudo.into(),
            room_name: room_id.to_string(),
        }
    }

    pub fn send(content: impl Into<String>, room_id: &RoomId) -> Self {
        Self::Send {
            content: content.into(),
            room_name: room_id.to_string(),
        }
    }
}

/// Generic `{event, data}` envelope used on the socket in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomListResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl RoomListResponse {
    /// Rooms keyed by id; the display name comes from the metadata when it has one.
    pub fn rooms(&self) -> Vec<Room> {
        self.data
            .iter()
            .filter(|(id, _)| !id.trim().is_empty())
            .map(|(id, metadata)| {
                let name = metadata
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(id.as_str());
                Room::new(id.as_str(), name)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomHistoryResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<RawMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_accepts_numeric_ids_and_null_content() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"id": 42, "userId": 7, "content": null, "dateEmis": "2024-01-01T00:00:00Z"}"#,
        )
        .expect("raw message");
        assert_eq!(raw.id.as_deref(), Some("42"));
        assert_eq!(raw.user_id.as_deref(), Some("7"));
        assert_eq!(raw.content, "");
        assert_eq!(raw.pseudo, None);
    }

    #[test]
    fn outbound_events_use_event_data_envelope() {
        let frame = serde_json::to_value(OutboundEvent::join("alice", &RoomId::from("general")))
            .expect("serialize");
        assert_eq!(
            frame,
            serde_json::json!({
                "event": "join-room",
                "data": {"pseudo": "alice", "roomName": "general"}
            })
        );
    }

    #[test]
    fn room_listing_falls_back_to_id_for_missing_names() {
        let response: RoomListResponse = serde_json::from_str(
            r#"{"success": true, "data": {"dev": {"name": "Developers"}, "misc": {"clients": {}}}}"#,
        )
        .expect("listing");
        let rooms = response.rooms();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0], Room::new("dev", "Developers"));
        assert_eq!(rooms[1], Room::new("misc", "misc"));
    }
}
