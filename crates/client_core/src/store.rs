use std::collections::HashMap;

use chrono::Duration;
use shared::domain::{Message, MessageId, RoomId};

/// Most recent messages kept per room.
pub const ROOM_MESSAGE_CAP: usize = 50;

/// How far a confirmed echo may predate its pending placeholder and still match it.
const PENDING_MATCH_SKEW_SECS: i64 = 60;

/// Per-room message collections. Every collection is unique by id, sorted by
/// date and holds at most `cap` entries.
#[derive(Debug, Clone)]
pub struct MessageStore {
    rooms: HashMap<RoomId, Vec<Message>>,
    cap: usize,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::with_cap(ROOM_MESSAGE_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            cap,
        }
    }

    /// Inserts unless the id is already present in the room, then re-sorts and
    /// evicts the oldest entries. Returns whether the message is in the room
    /// afterwards.
    pub fn add(&mut self, message: Message) -> bool {
        let messages = self.rooms.entry(message.room_id.clone()).or_default();
        if messages.iter().any(|existing| existing.id == message.id) {
            return false;
        }

        let id = message.id.clone();
        messages.push(message);
        // Stable: equal dates keep arrival order.
        messages.sort_by(|a, b| a.date.cmp(&b.date));
        if messages.len() > self.cap {
            let excess = messages.len() - self.cap;
            messages.drain(..excess);
        }

        messages.iter().any(|existing| existing.id == id)
    }

    pub fn remove(&mut self, room_id: &RoomId, message_id: &MessageId) -> Option<Message> {
        let messages = self.rooms.get_mut(room_id)?;
        let index = messages.iter().position(|m| &m.id == message_id)?;
        Some(messages.remove(index))
    }

    pub fn get(&self, room_id: &RoomId) -> &[Message] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, room_id: &RoomId, message_id: &MessageId) -> bool {
        self.get(room_id).iter().any(|m| &m.id == message_id)
    }

    pub fn ensure_room(&mut self, room_id: &RoomId) {
        self.rooms.entry(room_id.clone()).or_default();
    }

    pub fn drop_room(&mut self, room_id: &RoomId) -> Vec<Message> {
        self.rooms.remove(room_id).unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<RoomId, Vec<Message>> {
        self.rooms.clone()
    }

    /// Removes the oldest pending placeholder that `confirmed` is the server
    /// echo of: same room, author and content, placeholder not newer than the
    /// echo beyond a small clock skew.
    pub fn reconcile_pending(&mut self, confirmed: &Message) -> Option<Message> {
        let messages = self.rooms.get_mut(&confirmed.room_id)?;
        let index = messages.iter().position(|candidate| {
            candidate.pending
                && candidate.author == confirmed.author
                && candidate.content() == confirmed.content()
                && candidate.date <= confirmed.date + Duration::seconds(PENDING_MATCH_SKEW_SECS)
        })?;
        Some(messages.remove(index))
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
