//! A scripted walk through a Tether lobby.
//!
//! Two browser tabs are simulated against the handler directly: the first
//! logs in and opens a long-poll, the second logs in as the same player and
//! takes the character over. Run with `RUST_LOG=debug` to see the session
//! layer's own logging.

use std::time::Duration;

use serde_json::json;
use tether::logging::init_tracing;
use tether::prelude::*;
use tracing::info;

// ---------------------------------------------------------------------------
// Lobby commands
// ---------------------------------------------------------------------------

struct LobbyCommands;

impl CommandSink for LobbyCommands {
    fn handle(&self, player: &PlayerRecord, command: &str, session: &mut Session) {
        let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));
        match verb {
            "say" => session.display_line(DisplayLine {
                text: format!("{} says: {rest}", player.name),
                display: Some("say".into()),
            }),
            "look" => session.display_line(DisplayLine::plain(format!(
                "You are in {}.",
                player.location
            ))),
            _ => session.display_line(DisplayLine::system(format!("Unknown command: {verb}"))),
        }
    }
}

/// Tells the client which character it is driving.
struct CharacterName;

impl ConnectHook for CharacterName {
    fn player_connect(&self, player: &PlayerRecord, data: &mut ClientData) {
        data.insert("name".into(), json!(player.name));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn show(tab: &str, endpoint: &str, reply: &Reply) {
    match reply {
        Reply::Json(body) => println!("[{tab}] {endpoint} -> {}", String::from_utf8_lossy(body)),
        Reply::NoContent => println!("[{tab}] {endpoint} -> 204"),
    }
}

async fn connect(handler: &SessionHandler, tab: &str) -> Result<String, TetherError> {
    let reply = handler.connect(None, b"").await?;
    show(tab, "connect", &reply);
    let events: serde_json::Value = serde_json::from_slice(reply.body()).unwrap_or_default();
    Ok(events[0]["connect"].as_str().unwrap_or_default().to_string())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    let mut directory = InMemoryDirectory::new();
    let ayla = directory.add_user("ayla", "hunter2");
    directory.add_player(ayla, "Ayla", "the harbour market");

    let mut server = TetherServer::builder()
        .config(SessionConfig {
            pulse_interval_ms: 50,
            ..Default::default()
        })
        .hook(CharacterName)
        .commands(LobbyCommands)
        .build(directory);
    server.start();
    let handler = server.handler();

    // First tab: log in, act, then wait on a long-poll.
    let first = connect(&handler, "tab 1").await?;
    let creds = json!({"user_id": "ayla", "password": "hunter2"}).to_string();
    let reply = handler.login(Some(&first), creds.as_bytes()).await?;
    show("tab 1", "login", &reply);
    let reply = handler.action(Some(&first), br#"{"action": "say <hello>"}"#).await?;
    show("tab 1", "action", &reply);
    let reply = handler.action(Some(&first), br#"{"action": "look"}"#).await?;
    show("tab 1", "action", &reply);

    let receiver = handler.link(Some(&first)).await;
    let waiting = tokio::spawn(receiver.wait());

    // Second tab: same player, so the first tab is logged out.
    let second = connect(&handler, "tab 2").await?;
    let reply = handler.login(Some(&second), creds.as_bytes()).await?;
    show("tab 2", "login", &reply);
    let reply = handler.register_roster(Some(&second)).await?;
    show("tab 2", "roster", &reply);

    match tokio::time::timeout(Duration::from_secs(2), waiting).await {
        Ok(Ok(LinkOutcome::Delivered(batch))) => {
            println!("[tab 1] link -> {}", serde_json::to_string(&batch)?);
        }
        Ok(Ok(LinkOutcome::Abandoned)) => println!("[tab 1] link abandoned"),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => println!("[tab 1] link still waiting"),
    }

    let reply = handler.action(Some(&first), br#"{"action": "look"}"#).await?;
    show("tab 1", "action", &reply);

    server.shutdown().await;
    info!("lobby demo finished");
    Ok(())
}
