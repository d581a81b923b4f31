use std::{collections::HashMap, fs, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use url::Url;

pub const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub server_url: String,
    pub socket_url: Option<String>,
    pub database_url: String,
    pub pseudonym: Option<String>,
    pub history_limit: u32,
    pub reconnect_delay_ms: u64,
    pub rooms_path: String,
    pub history_path: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            socket_url: None,
            database_url: "sqlite://./data/chat.db".into(),
            pseudonym: None,
            history_limit: 50,
            reconnect_delay_ms: 2000,
            rooms_path: "/api/rooms".into(),
            history_path: "/api/rooms/{room}/messages".into(),
        }
    }
}

impl ClientSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Explicit socket url, or the server url with its scheme swapped to `ws`/`wss`.
    pub fn resolved_socket_url(&self) -> anyhow::Result<String> {
        if let Some(socket_url) = self.socket_url.as_deref().filter(|v| !v.trim().is_empty()) {
            return Ok(socket_url.trim().to_string());
        }
        derive_socket_url(&self.server_url)
    }
}

pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file_overrides(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };

    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("socket_url") {
        settings.socket_url = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("pseudonym") {
        settings.pseudonym = Some(v.clone());
    }
    if let Some(parsed) = file_cfg.get("history_limit").and_then(|v| v.parse().ok()) {
        settings.history_limit = parsed;
    }
    if let Some(parsed) = file_cfg
        .get("reconnect_delay_ms")
        .and_then(|v| v.parse().ok())
    {
        settings.reconnect_delay_ms = parsed;
    }
    if let Some(v) = file_cfg.get("rooms_path") {
        settings.rooms_path = v.clone();
    }
    if let Some(v) = file_cfg.get("history_path") {
        settings.history_path = v.clone();
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("CHAT_SOCKET_URL") {
        settings.socket_url = Some(v);
    }
    if let Some(v) = lookup("APP__SOCKET_URL") {
        settings.socket_url = Some(v);
    }

    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("CHAT_PSEUDONYM") {
        settings.pseudonym = Some(v);
    }

    if let Some(parsed) = lookup("APP__HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
        settings.history_limit = parsed;
    }
    if let Some(parsed) = lookup("APP__RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_delay_ms = parsed;
    }
}

fn derive_socket_url(server_url: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(server_url.trim())
        .with_context(|| format!("invalid server url '{server_url}'"))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("server_url must use http or https, got '{other}'")),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("cannot derive socket url from '{server_url}'"))?;
    Ok(url.to_string())
}

/// Turns plain file paths into `sqlite://` URLs. Parent directories are created
/// by the store when it opens the database.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return ClientSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
