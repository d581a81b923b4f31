use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Room, RoomId},
    error::WireError,
    protocol::{RawMessage, RoomHistoryResponse, RoomListResponse},
};
use tracing::debug;
use url::Url;

use crate::{catalog::RoomSource, config::ClientSettings, history::HistorySource};

const ROOM_PLACEHOLDER: &str = "{room}";

/// REST reads against the chat server: room listing and per-room history.
pub struct RestApi {
    http: Client,
    server_url: String,
    rooms_path: String,
    history_path: String,
    history_limit: u32,
}

impl RestApi {
    pub fn new(settings: &ClientSettings) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(http: Client, settings: &ClientSettings) -> Self {
        Self {
            http,
            server_url: settings.server_url.trim_end_matches('/').to_string(),
            rooms_path: settings.rooms_path.clone(),
            history_path: settings.history_path.clone(),
            history_limit: settings.history_limit,
        }
    }

    fn endpoint(&self, path: &str, room_id: Option<&RoomId>) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server url {}", self.server_url))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("server url {} cannot carry a path", self.server_url))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|segment| !segment.is_empty()) {
                match (segment, room_id) {
                    (ROOM_PLACEHOLDER, Some(room_id)) => segments.push(room_id.as_str()),
                    (ROOM_PLACEHOLDER, None) => {
                        return Err(anyhow!("path {path} needs a room id"));
                    }
                    _ => segments.push(segment),
                };
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let is_json = content_type
            .as_deref()
            .is_some_and(|value| value.to_ascii_lowercase().contains("json"));
        if !is_json {
            return Err(WireError::UnexpectedContentType {
                resource: resource.to_string(),
                content_type,
            }
            .into());
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body).map_err(|err| WireError::malformed(resource, err))?)
    }
}

#[async_trait]
impl RoomSource for RestApi {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        let url = self.endpoint(&self.rooms_path, None)?;
        let response: RoomListResponse = self.get_json("room list", url, &[]).await?;
        if !response.success {
            return Err(WireError::unsuccessful("room list").into());
        }
        Ok(response.rooms())
    }
}

#[async_trait]
impl HistorySource for RestApi {
    async fn room_history(&self, room_id: &RoomId) -> Result<Vec<RawMessage>> {
        let url = self.endpoint(&self.history_path, Some(room_id))?;
        let response: RoomHistoryResponse = self
            .get_json(
                "room history",
                url,
                &[("limit", self.history_limit.to_string())],
            )
            .await?;
        if !response.success {
            return Err(WireError::unsuccessful("room history").into());
        }

        let mut messages = response.data;
        let limit = self.history_limit as usize;
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        debug!(room_id = %room_id, count = messages.len(), "http: history fetched");
        Ok(messages)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
