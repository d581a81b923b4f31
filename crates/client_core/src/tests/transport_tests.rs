use super::*;
use std::sync::atomic::AtomicUsize;

fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
    let counter = Arc::clone(counter);
    Arc::new(move |_event: &InboundEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn revoked_handlers_stop_receiving_events() {
    let registry = ListenerRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let subscription = registry.register(EventKind::Message, counting_handler(&counter));
    registry.dispatch(&InboundEvent::Message(RawMessage::default()));
    subscription.revoke();
    registry.dispatch(&InboundEvent::Message(RawMessage::default()));

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(registry.listener_count(EventKind::Message), 0);
}

#[test]
fn dropping_a_subscription_revokes_it() {
    let registry = ListenerRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let _subscription = registry.register(EventKind::Connect, counting_handler(&counter));
        assert_eq!(registry.listener_count(EventKind::Connect), 1);
    }
    assert_eq!(registry.listener_count(EventKind::Connect), 0);
    assert_eq!(registry.dispatch(&InboundEvent::Connected), 0);
}

#[test]
fn dispatch_only_reaches_matching_kind() {
    let registry = ListenerRegistry::new();
    let messages = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let _a = registry.register(EventKind::Message, counting_handler(&messages));
    let _b = registry.register(EventKind::Disconnect, counting_handler(&disconnects));

    registry.dispatch(&InboundEvent::Disconnected);

    assert_eq!(messages.load(Ordering::SeqCst), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn subscriptions_outliving_the_registry_drop_quietly() {
    let registry = ListenerRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let subscription = registry.register(EventKind::Message, counting_handler(&counter));
    drop(registry);
    subscription.revoke();
}

#[tokio::test]
async fn in_memory_transport_requires_connection_to_emit() {
    let transport = InMemoryTransport::new();
    let event = OutboundEvent::send("hi", &"general".into());
    let err = transport.emit(event.clone()).await.expect_err("offline");
    assert!(err.to_string().contains("not connected"));

    transport.open().await.expect("open");
    transport.emit(event.clone()).await.expect("emit");
    assert_eq!(transport.emitted(), vec![event]);
}

#[tokio::test]
async fn unreachable_in_memory_transport_fails_to_open() {
    let transport = InMemoryTransport::new();
    transport.set_reachable(false);
    assert!(transport.open().await.is_err());
    assert!(!transport.is_connected());

    transport.restore_connection();
    assert!(transport.is_connected());
}
