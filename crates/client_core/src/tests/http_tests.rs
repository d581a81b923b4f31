use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::*;
use crate::{
    catalog::{default_rooms, RoomCatalog},
    history::HistoryLoader,
    store::MessageStore,
};

async fn list_rooms() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "general": { "name": "Server general" },
            "dev team": { "name": "Developers" },
            "random": {}
        }
    }))
}

async fn room_history(
    Path(room): Path<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    let limit: usize = query
        .get("limit")
        .and_then(|value| value.parse().ok())
        .unwrap_or(usize::MAX);
    let data: Vec<Value> = (0..5)
        .map(|index| {
            json!({
                "id": format!("{room}-{index}"),
                "pseudo": "bob",
                "category": "NEW_MESSAGE",
                "content": format!("message {index}"),
                "dateEmis": format!("2024-01-01T00:00:0{index}Z"),
                "roomName": room,
            })
        })
        .collect();
    let skip = data.len().saturating_sub(limit);
    Json(json!({ "success": true, "data": data[skip..].to_vec() }))
}

async fn html_rooms() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html")], "<html>maintenance</html>")
}

async fn failed_rooms() -> Json<Value> {
    Json(json!({ "success": false, "data": {} }))
}

async fn spawn_server(router: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn settings(server_url: String, rooms_path: &str) -> ClientSettings {
    ClientSettings {
        server_url,
        rooms_path: rooms_path.to_string(),
        history_limit: 3,
        ..ClientSettings::default()
    }
}

fn router() -> Router {
    Router::new()
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/:room/messages", get(room_history))
        .route("/html/rooms", get(html_rooms))
        .route("/failed/rooms", get(failed_rooms))
}

#[tokio::test]
async fn catalog_merges_remote_rooms_over_defaults() {
    let server_url = spawn_server(router()).await;
    let api = Arc::new(RestApi::new(&settings(server_url, "/api/rooms")));

    let rooms = RoomCatalog::new(api).fetch().await;
    assert_eq!(
        rooms,
        vec![
            Room::new("general", "Général"),
            Room::new("dev team", "Developers"),
            Room::new("random", "random"),
        ]
    );
}

#[tokio::test]
async fn wrong_content_type_is_rejected_and_catalog_falls_back() {
    let server_url = spawn_server(router()).await;
    let api = Arc::new(RestApi::new(&settings(server_url, "/html/rooms")));

    let err = api.list_rooms().await.expect_err("html body");
    assert!(matches!(
        err.downcast_ref::<WireError>(),
        Some(WireError::UnexpectedContentType { .. })
    ));
    assert_eq!(RoomCatalog::new(api).fetch().await, default_rooms());
}

#[tokio::test]
async fn unsuccessful_listing_is_an_error() {
    let server_url = spawn_server(router()).await;
    let api = RestApi::new(&settings(server_url, "/failed/rooms"));
    let err = api.list_rooms().await.expect_err("success=false");
    assert!(matches!(
        err.downcast_ref::<WireError>(),
        Some(WireError::Unsuccessful { .. })
    ));
}

#[tokio::test]
async fn unreachable_server_falls_back_to_defaults() {
    let api = Arc::new(RestApi::new(&settings(
        "http://127.0.0.1:9".to_string(),
        "/api/rooms",
    )));
    assert_eq!(RoomCatalog::new(api).fetch().await, default_rooms());
}

#[tokio::test]
async fn history_is_bounded_and_room_is_path_encoded() {
    let server_url = spawn_server(router()).await;
    let api = Arc::new(RestApi::new(&settings(server_url, "/api/rooms")));
    let room = RoomId::from("dev team");

    let raw = api.room_history(&room).await.expect("history");
    let ids: Vec<_> = raw.iter().filter_map(|m| m.id.as_deref()).collect();
    assert_eq!(ids, vec!["dev team-2", "dev team-3", "dev team-4"]);

    let mut store = MessageStore::new();
    let loader = HistoryLoader::new(api);
    assert_eq!(loader.load(&room, &mut store).await.len(), 3);
    assert!(loader.load(&room, &mut store).await.is_empty());
    assert_eq!(store.get(&room).len(), 3);
}

#[test]
fn endpoint_requires_a_room_for_templated_paths() {
    let api = RestApi::new(&ClientSettings::default());
    let err = api
        .endpoint("/api/rooms/{room}/messages", None)
        .expect_err("room required");
    assert!(err.to_string().contains("needs a room id"));

    let url = api
        .endpoint("/api/rooms/{room}/messages", Some(&RoomId::from("a/b")))
        .expect("url");
    assert_eq!(url.as_str(), "http://127.0.0.1:3000/api/rooms/a%2Fb/messages");
}
