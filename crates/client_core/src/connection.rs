use std::{fmt, sync::Arc};

use anyhow::Result;
use shared::{domain::RoomId, protocol::OutboundEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    transport::{EventHandler, EventKind, InboundEvent, Subscription, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Joined,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Joined => "joined",
            ConnectionState::Reconnecting => "reconnecting",
        })
    }
}

/// Owns the live transport for the active room: listener lifecycle, join
/// signalling and the connection state machine.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    active_room: Option<RoomId>,
    pseudonym: Option<String>,
    subscriptions: Vec<Subscription>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            active_room: None,
            pseudonym: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == ConnectionState::Joined
    }

    pub fn active_room(&self) -> Option<&RoomId> {
        self.active_room.as_ref()
    }

    pub fn listener_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Revokes every handler from the previous room, registers exactly one
    /// forwarding handler per event kind into `sink`, then opens or resumes
    /// the transport. Joining happens when the `connect` event is handled.
    pub async fn connect_to_room(
        &mut self,
        room_id: RoomId,
        pseudonym: String,
        sink: UnboundedSender<InboundEvent>,
    ) {
        self.revoke_listeners();

        for kind in EventKind::ALL {
            let sink = sink.clone();
            let handler: EventHandler = Arc::new(move |event: &InboundEvent| {
                let _ = sink.send(event.clone());
            });
            self.subscriptions.push(self.transport.subscribe(kind, handler));
        }

        info!(room_id = %room_id, pseudonym = %pseudonym, "connection: connecting to room");
        self.active_room = Some(room_id);
        self.pseudonym = Some(pseudonym);
        self.state = ConnectionState::Connecting;

        if self.transport.is_connected() {
            // Already up: no fresh `connect` will fire, so join on the new handlers now.
            let _ = sink.send(InboundEvent::Connected);
            return;
        }

        if let Err(err) = self.transport.open().await {
            warn!("connection: transport open failed, waiting for retry: {err}");
        }
    }

    /// Emits the join signal for the active room. Returns whether this call
    /// joined it; a repeated `connect` for a room already joined is ignored.
    pub async fn on_connected(&mut self) -> bool {
        if self.state == ConnectionState::Joined {
            debug!(state = %self.state, "connection: duplicate connect ignored");
            return false;
        }
        let (Some(room_id), Some(pseudonym)) = (self.active_room.clone(), self.pseudonym.clone())
        else {
            return false;
        };

        if let Err(err) = self
            .transport
            .emit(OutboundEvent::join(pseudonym, &room_id))
            .await
        {
            warn!(room_id = %room_id, "connection: join signal failed: {err}");
            return false;
        }

        info!(room_id = %room_id, "connection: joined");
        self.state = ConnectionState::Joined;
        true
    }

    pub fn on_disconnected(&mut self) {
        self.state = if self.active_room.is_some() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };
        warn!(state = %self.state, "connection: transport disconnected");
    }

    pub async fn send(&self, room_id: &RoomId, content: &str) -> Result<()> {
        if !self.is_joined() {
            return Err(ClientError::NotJoined(room_id.clone()).into());
        }
        self.transport
            .emit(OutboundEvent::send(content, room_id))
            .await
    }

    pub fn revoke_listeners(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.revoke();
        }
    }

    /// Stops listening for the active room without tearing down the transport.
    pub fn leave(&mut self) {
        self.revoke_listeners();
        self.active_room = None;
        self.pseudonym = None;
        self.state = ConnectionState::Disconnected;
    }

    pub async fn disconnect(&mut self) {
        self.leave();
        if let Err(err) = self.transport.close().await {
            warn!("connection: transport close failed: {err}");
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
