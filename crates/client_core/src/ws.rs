use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{OutboundEvent, RawMessage, SocketFrame, EVENT_MESSAGE};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::transport::{
    EventHandler, EventKind, InboundEvent, ListenerRegistry, Subscription, Transport,
    TransportError,
};

#[derive(Default)]
struct SocketLink {
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl SocketLink {
    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<String>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }
}

/// JSON-framed WebSocket transport that keeps reconnecting until closed.
pub struct WebSocketTransport {
    url: String,
    reconnect_delay: Duration,
    registry: Arc<ListenerRegistry>,
    link: Arc<SocketLink>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            reconnect_delay,
            registry: ListenerRegistry::new(),
            link: Arc::new(SocketLink::default()),
            task: Mutex::new(None),
        })
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.listener_count(kind)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("invalid socket url: {}", self.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(anyhow!("socket url must start with ws:// or wss://"));
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        *task = Some(tokio::spawn(run_socket(
            url.to_string(),
            self.reconnect_delay,
            Arc::clone(&self.registry),
            Arc::clone(&self.link),
        )));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.link.set_outbound(None);
        if self.link.connected.swap(false, Ordering::SeqCst) {
            self.registry.dispatch(&InboundEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: OutboundEvent) -> Result<()> {
        let frame = serde_json::to_string(&event).map_err(TransportError::Encode)?;
        let outbound = self.link.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = outbound.as_ref() else {
            return Err(TransportError::NotConnected.into());
        };
        sender
            .send(frame)
            .map_err(|_| TransportError::NotConnected)?;
        Ok(())
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.registry.register(kind, handler)
    }
}

async fn run_socket(
    url: String,
    reconnect_delay: Duration,
    registry: Arc<ListenerRegistry>,
    link: Arc<SocketLink>,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                let (mut writer, mut reader) = stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                link.set_outbound(Some(tx));
                link.connected.store(true, Ordering::SeqCst);
                info!(url = %url, "socket: connected");
                registry.dispatch(&InboundEvent::Connected);

                loop {
                    tokio::select! {
                        outgoing = rx.recv() => {
                            let Some(frame) = outgoing else { break };
                            if let Err(err) = writer.send(Message::Text(frame)).await {
                                warn!(url = %url, "socket: send failed: {err}");
                                break;
                            }
                        }
                        incoming = reader.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = parse_frame(&text) {
                                    registry.dispatch(&event);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(url = %url, "socket: receive failed: {err}");
                                break;
                            }
                        }
                    }
                }

                link.set_outbound(None);
                if link.connected.swap(false, Ordering::SeqCst) {
                    info!(url = %url, "socket: disconnected");
                    registry.dispatch(&InboundEvent::Disconnected);
                }
            }
            Err(err) => warn!(url = %url, "socket: connect failed: {err}"),
        }

        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Decodes one text frame. Unknown events and undecodable payloads yield `None`.
pub fn parse_frame(text: &str) -> Option<InboundEvent> {
    let frame: SocketFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("socket: ignoring malformed frame: {err}");
            return None;
        }
    };

    if frame.event != EVENT_MESSAGE {
        debug!(event = %frame.event, "socket: ignoring unhandled event");
        return None;
    }

    match serde_json::from_value::<RawMessage>(frame.data) {
        Ok(raw) => Some(InboundEvent::Message(raw)),
        Err(err) => {
            warn!("socket: ignoring malformed message payload: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
