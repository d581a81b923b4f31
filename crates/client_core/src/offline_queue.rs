use std::sync::Arc;

use anyhow::Result;
use shared::{domain::OfflineQueueItem, domain::RoomId, protocol::OutboundEvent};
use storage::{load_json, save_json, KeyValueStore, OFFLINE_QUEUE_KEY};
use tracing::{info, warn};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub sent: usize,
    pub remaining: usize,
}

/// Persisted FIFO of sends that could not reach the server.
pub struct OfflineQueue {
    items: Vec<OfflineQueueItem>,
    persistence: Arc<dyn KeyValueStore>,
    restored: bool,
}

impl OfflineQueue {
    /// Empty until the first `restore`, `enqueue` or `replay` reads the persisted queue.
    pub fn new(persistence: Arc<dyn KeyValueStore>) -> Self {
        Self {
            items: Vec::new(),
            persistence,
            restored: false,
        }
    }

    pub async fn load(persistence: Arc<dyn KeyValueStore>) -> Self {
        let mut queue = Self::new(persistence);
        queue.restore().await;
        queue
    }

    /// Reads the persisted queue once; unreadable state counts as empty.
    pub async fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        let persisted = match load_json::<Vec<OfflineQueueItem>>(
            self.persistence.as_ref(),
            OFFLINE_QUEUE_KEY,
        )
        .await
        {
            Ok(items) => items.unwrap_or_default(),
            Err(err) => {
                warn!("offline queue: failed to load persisted queue: {err}");
                Vec::new()
            }
        };
        if !persisted.is_empty() {
            info!(queued = persisted.len(), "offline queue: restored pending sends");
        }
        // Items only enter through `enqueue`, which restores first.
        self.items = persisted;
    }

    pub async fn save(&self) -> Result<()> {
        save_json(self.persistence.as_ref(), OFFLINE_QUEUE_KEY, &self.items).await
    }

    pub fn items(&self) -> &[OfflineQueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub async fn enqueue(&mut self, room_id: RoomId, content: String) {
        self.restore().await;
        self.items.push(OfflineQueueItem { room_id, content });
        if let Err(err) = self.save().await {
            warn!(queued = self.items.len(), "offline queue: failed to persist: {err}");
        }
    }

    /// Emits queued sends in order. Items leave the queue only once emitted;
    /// the first failure stops the replay and keeps it and everything after it.
    pub async fn replay(&mut self, transport: &dyn Transport) -> ReplayOutcome {
        self.restore().await;
        let mut sent = 0;
        for item in &self.items {
            match transport
                .emit(OutboundEvent::send(item.content.clone(), &item.room_id))
                .await
            {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(room_id = %item.room_id, "offline queue: replay interrupted: {err}");
                    break;
                }
            }
        }

        self.items.drain(..sent);
        if let Err(err) = self.save().await {
            warn!("offline queue: failed to persist after replay: {err}");
        }
        if sent > 0 {
            info!(sent, remaining = self.items.len(), "offline queue: replayed");
        }

        ReplayOutcome {
            sent,
            remaining: self.items.len(),
        }
    }
}

#[cfg(test)]
#[path = "tests/offline_queue_tests.rs"]
mod tests;
