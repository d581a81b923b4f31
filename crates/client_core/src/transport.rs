//! Live transport seam.
//!
//! Handlers are registered per event kind and every registration hands back a
//! [`Subscription`]. Dropping or revoking the subscription removes the handler,
//! so a reconnect can never stack a second handler on top of the first.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::protocol::{OutboundEvent, RawMessage, EVENT_CONNECT, EVENT_DISCONNECT, EVENT_MESSAGE};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Connect,
    Disconnect,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Message, EventKind::Connect, EventKind::Disconnect];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Message => EVENT_MESSAGE,
            EventKind::Connect => EVENT_CONNECT,
            EventKind::Disconnect => EVENT_DISCONNECT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(RawMessage),
    Connected,
    Disconnected,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Message(_) => EventKind::Message,
            InboundEvent::Connected => EventKind::Connect,
            InboundEvent::Disconnected => EventKind::Disconnect,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("failed to encode outbound event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts (or resumes) the connection. Connection outcome is reported
    /// through `connect`/`disconnect` events, not the return value.
    async fn open(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    async fn emit(&self, event: OutboundEvent) -> Result<()>;
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription;
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, Vec<(u64, EventHandler)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, kind: EventKind, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(self),
            revoked: false,
        }
    }

    fn revoke(&self, kind: EventKind, id: u64) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = handlers.get_mut(&kind) {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Calls every handler registered for the event's kind; returns how many ran.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        // Handlers run outside the lock so they may register or revoke.
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Revocation handle for one registered handler. Revoked on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<ListenerRegistry>,
    revoked: bool,
}

impl Subscription {
    pub fn revoke(mut self) {
        self.revoke_in_place();
    }

    fn revoke_in_place(&mut self) {
        if self.revoked {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.revoke(self.kind, self.id);
        }
        self.revoked = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.revoke_in_place();
    }
}

/// In-process transport. Records what is emitted and lets the host drive
/// connectivity and inbound traffic by hand; used by tests and offline demos.
pub struct InMemoryTransport {
    registry: Arc<ListenerRegistry>,
    connected: AtomicBool,
    reachable: AtomicBool,
    failing_emits: AtomicBool,
    emitted: Mutex<Vec<OutboundEvent>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self {
            registry: ListenerRegistry::new(),
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            failing_emits: AtomicBool::new(false),
            emitted: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_failing_emits(&self, failing: bool) {
        self.failing_emits.store(failing, Ordering::SeqCst);
    }

    pub fn emitted(&self) -> Vec<OutboundEvent> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.listener_count(kind)
    }

    pub fn deliver(&self, event: InboundEvent) -> usize {
        self.registry.dispatch(&event)
    }

    /// Simulates the link dropping underneath the client.
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.registry.dispatch(&InboundEvent::Disconnected);
        }
    }

    /// Simulates the transport's own retry succeeding.
    pub fn restore_connection(&self) {
        self.reachable.store(true, Ordering::SeqCst);
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.registry.dispatch(&InboundEvent::Connected);
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(anyhow!("in-memory transport is unreachable"));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.registry.dispatch(&InboundEvent::Connected);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.drop_connection();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: OutboundEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        if self.failing_emits.load(Ordering::SeqCst) {
            return Err(anyhow!("in-memory transport rejected {event:?}"));
        }
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.registry.register(kind, handler)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
