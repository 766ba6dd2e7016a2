//! Terminal chat client
//!
//! Joins one channel and relays stdin lines as chat messages. Lines starting
//! with `/` are commands:
//!
//!   /typing                 signal that you are typing
//!   /react <id> <emoji>     add a reaction
//!   /unreact <id> <emoji>   remove a reaction
//!   /reply <id> <text>      reply to a message
//!   /read <id>              mark a notification as read
//!   /readall                mark every notification as read
//!   /count                  show the unread notification count
//!   /status                 show connection state
//!   /quit                   leave
//!
//! Usage:
//!   CHATWIRE_ORIGIN=https://chat.example.com chatwire <channel-id>

use std::sync::Arc;

use anyhow::Context;
use chatwire_client::{ChannelConfig, ChannelManager, TracingNotifier};
use chatwire_shared::EventKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let channel_id = std::env::args()
        .nth(1)
        .context("usage: chatwire <channel-id>")?;

    let config = ChannelConfig::from_env().context("Invalid configuration")?;
    let manager = ChannelManager::new(config, Arc::new(TracingNotifier))
        .context("Failed to build HTTP client")?;

    register_handlers(&manager);
    manager.connect(channel_id.as_str());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&manager, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.disconnect().await;
    tracing::info!(channel_id = %channel_id, "Left channel");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("CHATWIRE_LOG_JSON").is_ok() {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn register_handlers(manager: &ChannelManager) {
    let registry = manager.registry();

    registry.on(EventKind::Message, |event| {
        if let Some(message) = event.chat_message() {
            let author = message
                .author
                .as_ref()
                .map(|author| author.display_name().to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("<{}> {}", author, message.content);
        }
        Ok(())
    });

    registry.on(EventKind::Notification, |event| {
        let title = event.payload["title"]
            .as_str()
            .or_else(|| event.payload["message"].as_str())
            .unwrap_or("(notification)");
        println!("* {}", title);
        Ok(())
    });

    registry.on(EventKind::Error, |event| {
        if let Some(error) = event.server_error() {
            println!("! {}", error.message);
        }
        Ok(())
    });
}

/// Run one input line. Returns false when the session should end.
async fn handle_line(manager: &ChannelManager, line: &str) -> bool {
    let channel = manager.channel();
    let mut parts = line.splitn(3, ' ');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(""), _, _) => {}
        (Some("/quit"), _, _) => return false,
        (Some("/typing"), _, _) => channel.start_typing(),
        (Some("/react"), Some(id), Some(emoji)) => {
            println!("[{:?}]", channel.add_reaction(id, emoji));
        }
        (Some("/unreact"), Some(id), Some(emoji)) => {
            println!("[{:?}]", channel.remove_reaction(id, emoji));
        }
        (Some("/reply"), Some(id), Some(text)) => {
            channel.stop_typing();
            println!("[{:?}]", channel.reply(text, id));
        }
        (Some("/read"), Some(id), _) => {
            if let Ok(done) = manager.api().mark_read(id).await {
                println!("[read: {}]", done);
            }
        }
        (Some("/readall"), _, _) => {
            if let Ok(done) = manager.api().mark_all_read().await {
                println!("[read all: {}]", done);
            }
        }
        (Some("/count"), _, _) => {
            if let Ok(count) = manager.api().unread_count().await {
                println!("[unread: {}]", count);
            }
        }
        (Some("/status"), _, _) => {
            let typing: Vec<String> = channel
                .typing_users()
                .into_iter()
                .map(|user| user.user_name.unwrap_or(user.user_id))
                .collect();
            println!(
                "[{:?}, attempts {}, queued {}, fallback {}, typing {:?}]",
                channel.state(),
                channel.reconnect_attempts(),
                channel.queued_len(),
                manager.fallback_active(),
                typing
            );
        }
        (Some(command), _, _) if command.starts_with('/') => {
            println!("[unknown command {}]", command);
        }
        _ => {
            channel.stop_typing();
            println!("[{:?}]", channel.send_message(line));
        }
    }
    true
}
