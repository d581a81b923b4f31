use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::load_settings,
    notify::{NoopHaptics, NotificationDispatcher, SystemNotifier},
    ChatClient, ClientEvent, SendOutcome,
};
use shared::domain::RoomId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// REST base url; overrides client.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    /// WebSocket endpoint; derived from the server url when absent.
    #[arg(long)]
    socket_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long, default_value = "general")]
    room: String,
}

/// Prints notifications for messages from other users to stderr.
struct TerminalNotifier;

impl SystemNotifier for TerminalNotifier {
    fn permission_granted(&self) -> bool {
        true
    }

    fn notify(&self, title: &str, body: &str) -> Result<()> {
        eprintln!("\x07[{title}] {body}");
        Ok(())
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::MessageStored(message) if !message.is_system => {
            let marker = if message.pending { " (pending)" } else { "" };
            let body = if message.is_image() {
                "[photo]"
            } else {
                message.text.as_str()
            };
            println!(
                "[{}] {} {}: {body}{marker}",
                message.room_id,
                message.date.format("%H:%M"),
                message.author
            );
        }
        ClientEvent::ConnectionChanged(state) => println!("-- connection {state}"),
        ClientEvent::QueueReplayed(outcome) if outcome.sent > 0 || outcome.remaining > 0 => {
            println!(
                "-- replayed {} queued message(s), {} still queued",
                outcome.sent, outcome.remaining
            );
        }
        ClientEvent::RoomsUpdated(rooms) => {
            let names: Vec<_> = rooms.iter().map(|room| room.id.as_str()).collect();
            println!("-- rooms: {}", names.join(", "));
        }
        _ => {}
    }
}

async fn run_command(client: &Arc<ChatClient>, room: &mut RoomId, line: &str) -> Result<bool> {
    let (command, argument) = line
        .split_once(' ')
        .map(|(command, argument)| (command, argument.trim()))
        .unwrap_or((line, ""));

    match command {
        "/quit" => return Ok(false),
        "/rooms" => {
            client.refresh_rooms().await;
        }
        "/join" if !argument.is_empty() => {
            *room = RoomId::from(argument);
            client.join_room(room).await?;
        }
        "/create" if !argument.is_empty() => {
            if !client.create_room(argument, argument).await {
                println!("-- room {argument} already exists");
            }
        }
        "/leave" => client.leave_room(room).await,
        "/image" if !argument.is_empty() => {
            let path = Path::new(argument);
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read image {}", path.display()))?;
            client.send_image(room, mime_type_for(path), &bytes).await?;
        }
        _ => println!("-- commands: /rooms /join <room> /create <room> /leave /image <path> /quit"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if args.socket_url.is_some() {
        settings.socket_url = args.socket_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    if args.username.is_some() {
        settings.pseudonym = args.username.clone();
    }

    let notifications = NotificationDispatcher::new(Arc::new(NoopHaptics), Arc::new(TerminalNotifier));
    let client = ChatClient::from_settings(&settings, notifications).await?;
    if let Some(username) = args.username.as_deref() {
        client.set_user(username, None).await?;
    }
    let Some(profile) = client.current_user().await else {
        anyhow::bail!("no user; pass --username or set CHAT_PSEUDONYM");
    };
    println!("-- chatting as {}", profile.username);

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    client.refresh_rooms().await;
    let mut room = RoomId::from(args.room);
    client.join_room(&room).await?;
    for message in client.visible_messages(&room).await {
        print_event(ClientEvent::MessageStored(message));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            match run_command(&client, &mut room, line).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    warn!("desktop: command failed: {err:#}");
                    continue;
                }
            }
        }
        match client.send(&room, line).await {
            Ok(SendOutcome::Confirmed) => {}
            Ok(SendOutcome::Pending(_)) => println!("-- offline, message queued"),
            Err(err) => warn!("desktop: send failed: {err:#}"),
        }
    }

    client.disconnect().await;
    Ok(())
}
