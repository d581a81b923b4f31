use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::Room;
use tracing::{info, warn};

/// Rooms that exist whether or not the server can be reached.
pub const DEFAULT_ROOMS: &[(&str, &str)] = &[("general", "Général")];

#[async_trait]
pub trait RoomSource: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>>;
}

pub struct MissingRoomSource;

#[async_trait]
impl RoomSource for MissingRoomSource {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        Err(anyhow!("room listing is unavailable"))
    }
}

pub fn default_rooms() -> Vec<Room> {
    DEFAULT_ROOMS
        .iter()
        .map(|(id, name)| Room::new(*id, *name))
        .collect()
}

/// Union by id. Entries already in `base` win over later duplicates.
pub fn merge_rooms(base: Vec<Room>, extra: impl IntoIterator<Item = Room>) -> Vec<Room> {
    let mut seen: HashSet<_> = base.iter().map(|room| room.id.clone()).collect();
    let mut merged = base;
    for room in extra {
        if seen.insert(room.id.clone()) {
            merged.push(room);
        }
    }
    merged
}

pub struct RoomCatalog {
    source: Arc<dyn RoomSource>,
}

impl RoomCatalog {
    pub fn new(source: Arc<dyn RoomSource>) -> Self {
        Self { source }
    }

    /// Default rooms enriched with the remote listing. Never empty.
    pub async fn fetch(&self) -> Vec<Room> {
        match self.source.list_rooms().await {
            Ok(remote) => {
                let merged = merge_rooms(default_rooms(), remote);
                info!(rooms = merged.len(), "catalog: room listing merged");
                merged
            }
            Err(err) => {
                warn!("catalog: room listing failed, using defaults: {err}");
                default_rooms()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRooms(Vec<Room>);

    #[async_trait]
    impl RoomSource for FixedRooms {
        async fn list_rooms(&self) -> Result<Vec<Room>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn failing_source_yields_exactly_the_defaults() {
        let catalog = RoomCatalog::new(Arc::new(MissingRoomSource));
        let rooms = catalog.fetch().await;
        assert!(!rooms.is_empty());
        assert_eq!(rooms, default_rooms());
    }

    #[tokio::test]
    async fn remote_rooms_are_merged_and_defaults_win_ties() {
        let catalog = RoomCatalog::new(Arc::new(FixedRooms(vec![
            Room::new("general", "Renamed by server"),
            Room::new("dev", "Developers"),
            Room::new("dev", "Duplicate"),
        ])));

        let rooms = catalog.fetch().await;
        assert_eq!(
            rooms,
            vec![Room::new("general", "Général"), Room::new("dev", "Developers")]
        );
    }

    #[tokio::test]
    async fn empty_remote_listing_keeps_defaults() {
        let catalog = RoomCatalog::new(Arc::new(FixedRooms(Vec::new())));
        assert_eq!(catalog.fetch().await, default_rooms());
    }
}
