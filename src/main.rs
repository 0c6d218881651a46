//! Local Chat
//!
//! Interactive terminal front end for the chat store. Asks for a display
//! name, restores saved history, then reads messages and commands from
//! stdin until `/quit` or end of input.

use anyhow::Context;
use local_chat::chat::{ChatStore, Message, SimulatedTransport};
use local_chat::config::Config;
use local_chat::logging::{init_tracing, RingBufferLog};
use local_chat::storage::{FileStore, StorageService};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use uuid::Uuid;

const HELP: &str = "Commands: /retry <id>, /delete <id>, /clear, /stats, /logs, /quit";

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Retry(u64),
    Delete(u64),
    Clear,
    Stats,
    Logs,
    Quit,
    Help,
    Invalid(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Send(line.to_string()));
        }

        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();
        let command = match (name, arg) {
            ("/retry", Some(id)) => id
                .parse()
                .map(Command::Retry)
                .unwrap_or_else(|_| Command::Invalid(format!("Not a message ID: {}", id))),
            ("/delete", Some(id)) => id
                .parse()
                .map(Command::Delete)
                .unwrap_or_else(|_| Command::Invalid(format!("Not a message ID: {}", id))),
            ("/retry" | "/delete", None) => {
                Command::Invalid(format!("Usage: {} <id>", name))
            }
            ("/clear", _) => Command::Clear,
            ("/stats", _) => Command::Stats,
            ("/logs", _) => Command::Logs,
            ("/quit" | "/exit", _) => Command::Quit,
            ("/help", _) => Command::Help,
            _ => Command::Invalid(format!("Unknown command: {}", name)),
        };
        Some(command)
    }
}

fn render(message: &Message, own_id: &str) -> String {
    let author = if message.is_own_message(own_id) {
        "you".to_string()
    } else if message.author().name.is_empty() {
        "unknown".to_string()
    } else {
        message.author().name.clone()
    };
    let status = if message.delivered() {
        String::new()
    } else if message.can_retry() {
        format!(" [failed, /retry {}]", message.id())
    } else {
        " [failed]".to_string()
    };
    format!(
        "#{} {} {}: {}{}",
        message.id(),
        message.timestamp().format("%H:%M:%S"),
        author,
        message.text(),
        status
    )
}

/// Ask for a display name until one is accepted
///
/// Returns false if input ends first.
async fn prompt_identity(
    store: &ChatStore,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<bool> {
    let id = Uuid::new_v4().to_string();
    loop {
        println!("Display name:");
        let Some(line) = lines.next_line().await? else {
            return Ok(false);
        };
        match store.set_identity(&line, &id) {
            Ok(()) => return Ok(true),
            Err(e) => println!("{}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let backend = FileStore::open(config.store_path())
        .with_context(|| format!("Failed to open {}", config.store_path().display()))?;
    let log = Arc::new(RingBufferLog::new(config.log_capacity));
    let store = ChatStore::new(
        StorageService::new(Arc::new(backend)),
        Arc::new(SimulatedTransport::from_config(&config.delivery)),
        log.clone(),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if !prompt_identity(&store, &mut lines).await? {
        return Ok(());
    }
    let me = store.identity();
    info!(name = %me.name, id = %me.id, "Session started");

    store.restore();
    for message in store.messages() {
        println!("{}", render(&message, &me.id));
    }
    println!("Welcome, {}. {}", me.name, HELP);

    while let Some(line) = lines.next_line().await? {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        match command {
            Command::Send(text) => match store.send(&text).await {
                Ok(message) => println!("{}", render(&message, &me.id)),
                Err(e) => println!("{}", e),
            },
            Command::Retry(id) => match store.retry(id).await {
                Ok(message) => println!("{}", render(&message, &me.id)),
                Err(e) => println!("{}", e),
            },
            Command::Delete(id) => {
                if store.delete(id) {
                    store.persist();
                    println!("Deleted #{}", id);
                } else {
                    println!("No message #{}", id);
                }
            }
            Command::Clear => {
                store.clear();
                println!("Conversation cleared");
            }
            Command::Stats => {
                let stats = store.stats();
                println!(
                    "{} messages, {} sent, {} failed",
                    stats.total, stats.sent, stats.failed
                );
            }
            Command::Logs => {
                for entry in log.entries() {
                    let data = entry.data.map(|d| format!(" {}", d)).unwrap_or_default();
                    println!(
                        "{} {:<5} {}{}",
                        entry.timestamp.format("%H:%M:%S"),
                        entry.level.as_str(),
                        entry.message,
                        data
                    );
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Invalid(reason) => println!("{}", reason),
            Command::Quit => break,
        }
    }

    info!("Session ended");
    Ok(())
}
