use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::domain::{Message, MessageId, OfflineQueueItem, Room, RoomId, UserProfile};
use storage::{load_json, save_json, KeyValueStore, SqliteKeyValueStore, CHAT_DATA_KEY};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod http;
pub mod normalizer;
pub mod notify;
pub mod offline_queue;
pub mod store;
pub mod transport;
pub mod ws;

use catalog::{default_rooms, merge_rooms, MissingRoomSource, RoomCatalog, RoomSource};
use config::{normalize_database_url, ClientSettings};
use connection::{ConnectionManager, ConnectionState};
use error::ClientError;
use history::{HistoryLoader, HistorySource, MissingHistorySource};
use http::RestApi;
use notify::NotificationDispatcher;
use offline_queue::{OfflineQueue, ReplayOutcome};
use store::MessageStore;
use transport::{InboundEvent, Transport};
use ws::WebSocketTransport;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    MessageStored(Message),
    MessageRemoved {
        room_id: RoomId,
        message_id: MessageId,
    },
    ConnectionChanged(ConnectionState),
    QueueReplayed(ReplayOutcome),
    RoomsUpdated(Vec<Room>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Emitted live; the message appears once the server echoes it.
    Confirmed,
    /// Stored as a pending placeholder and queued for replay.
    Pending(MessageId),
}

/// Warm-start blob stored under `chat.data`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedChatState {
    #[serde(default)]
    rooms: Vec<Room>,
    #[serde(default)]
    messages: HashMap<RoomId, Vec<Message>>,
    #[serde(default)]
    current_user: Option<UserProfile>,
}

pub struct ChatClient {
    persistence: Arc<dyn KeyValueStore>,
    catalog: RoomCatalog,
    history: HistoryLoader,
    notifications: NotificationDispatcher,
    inner: Mutex<ChatState>,
    events: broadcast::Sender<ClientEvent>,
}

struct ChatState {
    connection: ConnectionManager,
    store: MessageStore,
    queue: OfflineQueue,
    rooms: Vec<Room>,
    current_user: Option<UserProfile>,
    pump_task: Option<JoinHandle<()>>,
}

impl ChatState {
    fn local_user(&self) -> Option<&str> {
        self.current_user
            .as_ref()
            .map(|profile| profile.username.as_str())
    }

    fn snapshot(&self) -> PersistedChatState {
        PersistedChatState {
            rooms: self.rooms.clone(),
            messages: self.store.snapshot(),
            current_user: self.current_user.clone(),
        }
    }

    fn stop_pump(&mut self) {
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
    }
}

impl ChatClient {
    pub fn new(transport: Arc<dyn Transport>, persistence: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Self::new_with_dependencies(
            transport,
            persistence,
            Arc::new(MissingRoomSource),
            Arc::new(MissingHistorySource),
            NotificationDispatcher::disabled(),
        )
    }

    pub fn new_with_dependencies(
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn KeyValueStore>,
        room_source: Arc<dyn RoomSource>,
        history_source: Arc<dyn HistorySource>,
        notifications: NotificationDispatcher,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            persistence: persistence.clone(),
            catalog: RoomCatalog::new(room_source),
            history: HistoryLoader::new(history_source),
            notifications,
            inner: Mutex::new(ChatState {
                connection: ConnectionManager::new(transport),
                store: MessageStore::new(),
                queue: OfflineQueue::new(persistence),
                rooms: default_rooms(),
                current_user: None,
                pump_task: None,
            }),
            events,
        })
    }

    /// Sqlite persistence, REST sources and a WebSocket transport built from
    /// settings, with any persisted state already restored.
    pub async fn from_settings(
        settings: &ClientSettings,
        notifications: NotificationDispatcher,
    ) -> Result<Arc<Self>> {
        let database_url = normalize_database_url(&settings.database_url);
        let persistence = Arc::new(SqliteKeyValueStore::new(&database_url).await?);
        let transport =
            WebSocketTransport::new(settings.resolved_socket_url()?, settings.reconnect_delay());
        let api = Arc::new(RestApi::new(settings));

        let client = Self::new_with_dependencies(
            transport,
            persistence,
            api.clone(),
            api,
            notifications,
        );
        client.restore().await;

        if let Some(pseudonym) = settings.pseudonym.as_deref() {
            if client.current_user().await.is_none() {
                client.set_user(pseudonym, None).await?;
            }
        }
        Ok(client)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Loads the warm-start snapshot and the offline queue. Returns whether a
    /// snapshot was found; unreadable state is treated as absent.
    pub async fn restore(&self) -> bool {
        let snapshot = match load_json::<PersistedChatState>(self.persistence.as_ref(), CHAT_DATA_KEY)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("client: failed to read persisted state: {err}");
                None
            }
        };

        let mut state = self.inner.lock().await;
        state.queue.restore().await;
        let Some(snapshot) = snapshot else {
            return false;
        };

        state.rooms = merge_rooms(default_rooms(), snapshot.rooms);
        let mut restored = 0;
        for message in snapshot.messages.into_values().flatten() {
            if state.store.add(message) {
                restored += 1;
            }
        }
        if snapshot.current_user.is_some() {
            state.current_user = snapshot.current_user;
        }
        info!(
            rooms = state.rooms.len(),
            messages = restored,
            queued = state.queue.len(),
            "client: restored persisted state"
        );
        true
    }

    pub async fn persist(&self) -> Result<()> {
        let state = self.inner.lock().await;
        save_json(self.persistence.as_ref(), CHAT_DATA_KEY, &state.snapshot()).await
    }

    async fn persist_state(&self, state: &ChatState) {
        if let Err(err) = save_json(self.persistence.as_ref(), CHAT_DATA_KEY, &state.snapshot()).await
        {
            warn!("client: failed to persist state: {err}");
        }
    }

    pub async fn set_user(&self, username: &str, photo: Option<String>) -> Result<UserProfile> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::MissingProfile.into());
        }
        let profile = UserProfile {
            username: username.to_string(),
            photo,
        };

        let mut state = self.inner.lock().await;
        state.current_user = Some(profile.clone());
        self.persist_state(&state).await;
        info!(username = %profile.username, "client: current user set");
        Ok(profile)
    }

    pub async fn current_user(&self) -> Option<UserProfile> {
        self.inner.lock().await.current_user.clone()
    }

    /// Re-reads the catalog; rooms created locally are kept after the fetched set.
    pub async fn refresh_rooms(&self) -> Vec<Room> {
        let fetched = self.catalog.fetch().await;

        let mut state = self.inner.lock().await;
        let known = std::mem::take(&mut state.rooms);
        state.rooms = merge_rooms(fetched, known);
        self.persist_state(&state).await;
        let rooms = state.rooms.clone();
        self.publish(ClientEvent::RoomsUpdated(rooms.clone()));
        rooms
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.inner.lock().await.rooms.clone()
    }

    /// Adds a room to the catalog. Returns false when the id is already known.
    pub async fn create_room(&self, room_id: &str, name: &str) -> bool {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return false;
        }
        let name = match name.trim() {
            "" => room_id,
            name => name,
        };

        let mut state = self.inner.lock().await;
        if state.rooms.iter().any(|room| room.id.as_str() == room_id) {
            return false;
        }
        state.rooms.push(Room::new(room_id, name));
        state.store.ensure_room(&RoomId::from(room_id));
        self.persist_state(&state).await;
        self.publish(ClientEvent::RoomsUpdated(state.rooms.clone()));
        true
    }

    /// Forgets a room and its messages, leaving it first when it is the active room.
    pub async fn leave_room(&self, room_id: &RoomId) {
        let mut state = self.inner.lock().await;
        if state.connection.active_room() == Some(room_id) {
            state.stop_pump();
            state.connection.leave();
            self.publish(ClientEvent::ConnectionChanged(state.connection.state()));
        }

        let dropped = state.store.drop_room(room_id);
        state.rooms.retain(|room| &room.id != room_id);
        info!(room_id = %room_id, dropped = dropped.len(), "client: left room");
        self.persist_state(&state).await;
        self.publish(ClientEvent::RoomsUpdated(state.rooms.clone()));
    }

    /// Switches the live connection to `room_id`, then backfills its history.
    pub async fn join_room(self: &Arc<Self>, room_id: &RoomId) -> Result<()> {
        {
            let mut state = self.inner.lock().await;
            let pseudonym = state
                .local_user()
                .map(str::to_string)
                .ok_or(ClientError::MissingProfile)?;

            state.stop_pump();
            let (sink, events) = mpsc::unbounded_channel();
            state.store.ensure_room(room_id);
            state
                .connection
                .connect_to_room(room_id.clone(), pseudonym, sink)
                .await;
            state.pump_task = Some(self.spawn_event_pump(events));
            self.publish(ClientEvent::ConnectionChanged(state.connection.state()));
        }

        // A late response for a room left meanwhile is still stored under its own id.
        let messages = self.history.fetch(room_id).await;
        let mut state = self.inner.lock().await;
        let mut inserted = Vec::new();
        for message in messages {
            if self.insert_message(&mut state, message.clone()) {
                inserted.push(message);
            }
        }
        debug!(room_id = %room_id, inserted = inserted.len(), "client: history applied");
        if !inserted.is_empty() {
            self.persist_state(&state).await;
        }
        for message in inserted {
            self.publish(ClientEvent::MessageStored(message));
        }
        Ok(())
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<InboundEvent>,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(client) = weak.upgrade() else {
                    break;
                };
                client.handle_event(event).await;
            }
        })
    }

    pub async fn disconnect(&self) {
        let mut state = self.inner.lock().await;
        state.stop_pump();
        state.connection.disconnect().await;
        self.publish(ClientEvent::ConnectionChanged(state.connection.state()));
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection.state()
    }

    pub async fn active_room(&self) -> Option<RoomId> {
        self.inner.lock().await.connection.active_room().cloned()
    }

    pub async fn messages(&self, room_id: &RoomId) -> Vec<Message> {
        self.inner.lock().await.store.get(room_id).to_vec()
    }

    /// Messages for display: system notices are left out.
    pub async fn visible_messages(&self, room_id: &RoomId) -> Vec<Message> {
        self.inner
            .lock()
            .await
            .store
            .get(room_id)
            .iter()
            .filter(|message| !message.is_system)
            .cloned()
            .collect()
    }

    pub async fn delete_message(&self, room_id: &RoomId, message_id: &MessageId) -> bool {
        let mut state = self.inner.lock().await;
        if state.store.remove(room_id, message_id).is_none() {
            return false;
        }
        self.persist_state(&state).await;
        self.publish(ClientEvent::MessageRemoved {
            room_id: room_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    /// Live send while joined; otherwise, or if the emit fails, a pending
    /// placeholder is stored and the content queued for replay.
    pub async fn send(&self, room_id: &RoomId, content: &str) -> Result<SendOutcome> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyContent.into());
        }

        let mut state = self.inner.lock().await;
        let author = state
            .local_user()
            .map(str::to_string)
            .ok_or(ClientError::MissingProfile)?;

        if state.connection.is_joined() {
            match state.connection.send(room_id, content).await {
                Ok(()) => {
                    debug!(room_id = %room_id, "client: message sent");
                    return Ok(SendOutcome::Confirmed);
                }
                Err(err) => warn!(room_id = %room_id, "client: send failed, queueing: {err}"),
            }
        }

        let placeholder = normalizer::pending_message(room_id, &author, content, Utc::now());
        let placeholder_id = placeholder.id.clone();
        state.queue.enqueue(room_id.clone(), content.to_string()).await;
        if state.store.add(placeholder.clone()) {
            self.persist_state(&state).await;
            self.publish(ClientEvent::MessageStored(placeholder));
        }
        info!(room_id = %room_id, queued = state.queue.len(), "client: message queued offline");
        Ok(SendOutcome::Pending(placeholder_id))
    }

    pub async fn send_image(
        &self,
        room_id: &RoomId,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<SendOutcome> {
        self.send(room_id, &normalizer::image_data_url(mime_type, bytes))
            .await
    }

    pub async fn queued_sends(&self) -> Vec<OfflineQueueItem> {
        self.inner.lock().await.queue.items().to_vec()
    }

    /// Applies one inbound transport event to completion.
    pub async fn handle_event(&self, event: InboundEvent) {
        let mut state = self.inner.lock().await;
        match event {
            InboundEvent::Message(raw) => {
                let fallback_room = state
                    .connection
                    .active_room()
                    .cloned()
                    .unwrap_or_else(|| RoomId::from(catalog::DEFAULT_ROOMS[0].0));
                let Some(message) = normalizer::normalize(&raw, &fallback_room) else {
                    debug!("client: dropped informational payload");
                    return;
                };
                self.apply_live_message(&mut state, message).await;
            }
            InboundEvent::Connected => self.handle_connected(&mut state).await,
            InboundEvent::Disconnected => {
                state.connection.on_disconnected();
                self.publish(ClientEvent::ConnectionChanged(state.connection.state()));
            }
        }
    }

    /// Stores a server-origin message. When the local user authored it, the
    /// pending placeholder it confirms is removed first, whichever path
    /// (history or live) delivers it.
    fn insert_message(&self, state: &mut ChatState, message: Message) -> bool {
        if state.store.contains(&message.room_id, &message.id) {
            return false;
        }
        if state.local_user() == Some(message.author.as_str()) {
            if let Some(placeholder) = state.store.reconcile_pending(&message) {
                debug!(
                    room_id = %message.room_id,
                    placeholder_id = %placeholder.id,
                    message_id = %message.id,
                    "client: pending placeholder confirmed"
                );
                self.publish(ClientEvent::MessageRemoved {
                    room_id: placeholder.room_id,
                    message_id: placeholder.id,
                });
            }
        }
        state.store.add(message)
    }

    async fn apply_live_message(&self, state: &mut ChatState, message: Message) {
        if !self.insert_message(state, message.clone()) {
            debug!(message_id = %message.id, "client: duplicate message ignored");
            return;
        }
        self.persist_state(state).await;
        self.notifications.dispatch(&message, state.local_user());
        self.publish(ClientEvent::MessageStored(message));
    }

    async fn handle_connected(&self, state: &mut ChatState) {
        if !state.connection.on_connected().await {
            return;
        }
        self.publish(ClientEvent::ConnectionChanged(state.connection.state()));

        let transport = state.connection.transport().clone();
        let outcome = state.queue.replay(transport.as_ref()).await;
        self.publish(ClientEvent::QueueReplayed(outcome));
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
