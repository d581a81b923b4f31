use super::*;
use chrono::{DateTime, TimeZone, Utc};

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("timestamp")
}

fn message(id: &str, seconds: i64) -> Message {
    Message {
        id: MessageId::from(id),
        room_id: RoomId::from("general"),
        author: "bob".to_string(),
        text: format!("text {id}"),
        photo: None,
        date: at(seconds),
        is_system: false,
        pending: false,
    }
}

fn general() -> RoomId {
    RoomId::from("general")
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut store = MessageStore::new();
    assert!(store.add(message("a", 1)));
    assert!(!store.add(message("a", 1)));

    let mut altered = message("a", 5);
    altered.text = "different body".to_string();
    assert!(!store.add(altered));

    assert_eq!(store.get(&general()).len(), 1);
    assert_eq!(store.get(&general())[0].text, "text a");
}

#[test]
fn out_of_order_arrivals_are_sorted_by_date() {
    let mut store = MessageStore::new();
    for (id, seconds) in [("c", 30), ("a", 10), ("d", 40), ("b", 20), ("e", 20)] {
        store.add(message(id, seconds));
    }

    let ids: Vec<&str> = store
        .get(&general())
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b", "e", "c", "d"]);
    assert!(store
        .get(&general())
        .windows(2)
        .all(|pair| pair[0].date <= pair[1].date));
}

#[test]
fn keeps_only_the_most_recent_fifty() {
    let mut store = MessageStore::new();
    // Newest first, so every insertion lands at the front and forces a sort.
    for n in (0..120).rev() {
        store.add(message(&format!("m{n}"), n));
    }

    let messages = store.get(&general());
    assert_eq!(messages.len(), ROOM_MESSAGE_CAP);
    assert_eq!(messages.first().map(|m| m.id.as_str()), Some("m70"));
    assert_eq!(messages.last().map(|m| m.id.as_str()), Some("m119"));
}

#[test]
fn message_older_than_a_full_window_is_evicted_immediately() {
    let mut store = MessageStore::with_cap(3);
    for (id, seconds) in [("a", 10), ("b", 20), ("c", 30)] {
        assert!(store.add(message(id, seconds)));
    }

    assert!(!store.add(message("old", 1)));
    assert_eq!(store.get(&general()).len(), 3);
    assert!(!store.contains(&general(), &MessageId::from("old")));
}

#[test]
fn remove_filters_by_id_only() {
    let mut store = MessageStore::new();
    store.add(message("a", 1));
    store.add(message("b", 2));

    let removed = store.remove(&general(), &MessageId::from("a"));
    assert_eq!(removed.map(|m| m.id), Some(MessageId::from("a")));
    assert_eq!(store.remove(&general(), &MessageId::from("missing")), None);
    assert_eq!(store.get(&general()).len(), 1);
}

#[test]
fn unknown_rooms_read_as_empty_and_are_created_lazily() {
    let mut store = MessageStore::new();
    let lobby = RoomId::from("lobby");
    assert!(store.get(&lobby).is_empty());

    let mut first = message("x", 1);
    first.room_id = lobby.clone();
    store.add(first);
    assert_eq!(store.get(&lobby).len(), 1);
    assert!(store.get(&general()).is_empty());
}

#[test]
fn reconcile_removes_matching_placeholder_only() {
    let mut store = MessageStore::new();
    let mut placeholder = message("pending-1", 10);
    placeholder.author = "alice".to_string();
    placeholder.text = "hi".to_string();
    placeholder.pending = true;
    store.add(placeholder);

    let mut echo = message("server-1", 500);
    echo.author = "alice".to_string();
    echo.text = "other".to_string();
    assert_eq!(store.reconcile_pending(&echo), None);

    echo.text = "hi".to_string();
    let removed = store.reconcile_pending(&echo).expect("placeholder");
    assert_eq!(removed.id, MessageId::from("pending-1"));
    assert!(store.get(&general()).is_empty());
}

#[test]
fn reconcile_ignores_placeholders_newer_than_the_echo() {
    let mut store = MessageStore::new();
    let mut placeholder = message("pending-1", 600);
    placeholder.author = "alice".to_string();
    placeholder.pending = true;
    store.add(placeholder);

    let mut echo = message("server-1", 10);
    echo.author = "alice".to_string();
    echo.text = "text pending-1".to_string();
    assert_eq!(store.reconcile_pending(&echo), None);
}
