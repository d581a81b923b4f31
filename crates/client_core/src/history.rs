use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Message, RoomId},
    protocol::RawMessage,
};
use tracing::{debug, warn};

use crate::normalizer;

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn room_history(&self, room_id: &RoomId) -> Result<Vec<RawMessage>>;
}

pub struct MissingHistorySource;

#[async_trait]
impl HistorySource for MissingHistorySource {
    async fn room_history(&self, room_id: &RoomId) -> Result<Vec<RawMessage>> {
        Err(anyhow!("history is unavailable for room {room_id}"))
    }
}

pub struct HistoryLoader {
    source: Arc<dyn HistorySource>,
}

impl HistoryLoader {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self { source }
    }

    /// Normalized history for a room; failures read as no history.
    pub async fn fetch(&self, room_id: &RoomId) -> Vec<Message> {
        match self.source.room_history(room_id).await {
            Ok(raw) => {
                let messages: Vec<Message> = raw
                    .iter()
                    .filter_map(|payload| normalizer::normalize(payload, room_id))
                    .collect();
                debug!(
                    room_id = %room_id,
                    total = raw.len(),
                    kept = messages.len(),
                    "history: fetched"
                );
                messages
            }
            Err(err) => {
                warn!(room_id = %room_id, "history: fetch failed: {err}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHistory(Vec<RawMessage>);

    #[async_trait]
    impl HistorySource for FixedHistory {
        async fn room_history(&self, _room_id: &RoomId) -> Result<Vec<RawMessage>> {
            Ok(self.0.clone())
        }
    }

    fn raw(id: &str, date: &str, category: Option<&str>) -> RawMessage {
        RawMessage {
            id: Some(id.to_string()),
            pseudo: Some("bob".to_string()),
            category: category.map(str::to_string),
            content: format!("body {id}"),
            date_emis: Some(date.to_string()),
            ..RawMessage::default()
        }
    }

    #[tokio::test]
    async fn fetch_normalizes_and_drops_info_payloads() {
        let loader = HistoryLoader::new(Arc::new(FixedHistory(vec![
            raw("b", "2024-01-01T00:00:02Z", None),
            raw("a", "2024-01-01T00:00:01Z", None),
            raw("info", "2024-01-01T00:00:03Z", Some("INFO")),
        ])));
        let room = RoomId::from("general");

        let messages = loader.fetch(&room).await;
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(messages.iter().all(|m| m.room_id == room && m.author == "bob"));
    }

    #[tokio::test]
    async fn failed_fetch_reads_as_no_history() {
        let loader = HistoryLoader::new(Arc::new(MissingHistorySource));

        assert!(loader.fetch(&RoomId::from("general")).await.is_empty());
    }
}
