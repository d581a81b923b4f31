use super::*;
use serde::Deserialize;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Sample {
    room: String,
    count: u32,
}

#[tokio::test]
async fn sqlite_store_round_trips_and_overwrites_blobs() {
    let store = SqliteKeyValueStore::new("sqlite::memory:").await.expect("db");
    assert_eq!(store.get("chat.data").await.expect("get"), None);

    store.put("chat.data", "{\"a\":1}").await.expect("put");
    store.put("chat.data", "{\"a\":2}").await.expect("overwrite");
    assert_eq!(
        store.get("chat.data").await.expect("get").as_deref(),
        Some("{\"a\":2}")
    );

    store.remove("chat.data").await.expect("remove");
    assert_eq!(store.get("chat.data").await.expect("get"), None);
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let store = SqliteKeyValueStore::new("sqlite::memory:").await.expect("db");
    store.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("chat.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let store = SqliteKeyValueStore::new(&database_url).await.expect("db");
    store.put(OFFLINE_QUEUE_KEY, "[]").await.expect("put");
    drop(store);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    let reopened = SqliteKeyValueStore::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.get(OFFLINE_QUEUE_KEY).await.expect("get").as_deref(),
        Some("[]")
    );
}

#[tokio::test]
async fn json_helpers_round_trip_values() {
    let store = MemoryKeyValueStore::new();
    let sample = Sample {
        room: "general".to_string(),
        count: 3,
    };
    save_json(&store, CHAT_DATA_KEY, &sample).await.expect("save");

    let loaded: Option<Sample> = load_json(&store, CHAT_DATA_KEY).await.expect("load");
    assert_eq!(loaded, Some(sample));
}

#[tokio::test]
async fn corrupted_blob_reads_as_absent() {
    let store = MemoryKeyValueStore::new();
    store.put(CHAT_DATA_KEY, "{not json").await.expect("put");

    let loaded: Option<Sample> = load_json(&store, CHAT_DATA_KEY).await.expect("load");
    assert_eq!(loaded, None);
}

#[test]
fn in_memory_urls_have_no_backing_path() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/chat.db?mode=rwc"),
        Some(PathBuf::from("./data/chat.db"))
    );
}
