//! Syncwire CLI - watch and drive a real-time backend session.
//!
//! This is the main binary entry point. See the `syncwire` library for
//! the core functionality.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use syncwire::{
    Config, EventCategory, MessagePayload, OutboundCommand, SessionService, SessionStatus, Topic,
    WsConnector,
};
use tokio::sync::{broadcast, mpsc};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "syncwire")]
#[command(version)]
#[command(about = "Real-time WebSocket session client")]
struct Cli {
    /// REST base URL (overrides config and SYNCWIRE_SERVER_URL)
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Bearer token (overrides SYNCWIRE_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print routed events as JSON lines until Ctrl-C
    Watch {
        /// Topic to subscribe to, as kind:id (repeatable)
        #[arg(long = "topic")]
        topics: Vec<Topic>,
        /// Only print these categories (default: all, or the subscribed ones)
        #[arg(long = "category")]
        categories: Vec<EventCategory>,
    },
    /// Post a chat message
    Send {
        /// Chat topic, as chat:id
        #[arg(long)]
        topic: Topic,
        /// Message text
        #[arg(long)]
        text: String,
    },
    /// Show or change configuration
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if let Some(token) = cli.token {
        config.token = token;
    }

    match cli.command {
        Commands::Watch { topics, categories } => watch(&config, topics, categories).await,
        Commands::Send { topic, text } => send(&config, topic, text).await,
        Commands::Config { key, value } => {
            match (key, value) {
                (None, None) => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    println!("token: {}", config.redacted_token());
                }
                (Some(k), None) => {
                    let json = serde_json::to_value(&config)?;
                    match json.get(&k) {
                        Some(v) => println!("{v}"),
                        None => anyhow::bail!("Unknown config key '{k}'"),
                    }
                }
                (Some(k), Some(v)) => {
                    config.set(&k, &v)?;
                    config.save()?;
                    println!("Set {k} = {v}");
                }
                (None, Some(_)) => anyhow::bail!("A value needs a key"),
            }
            Ok(())
        }
    }
}

async fn watch(config: &Config, topics: Vec<Topic>, categories: Vec<EventCategory>) -> Result<()> {
    let session = SessionService::new(config.session_config(), Arc::new(WsConnector));

    let categories: BTreeSet<EventCategory> = if !categories.is_empty() {
        categories.into_iter().collect()
    } else if !topics.is_empty() {
        topics.iter().map(|t| t.category).collect()
    } else {
        EventCategory::ALL.into_iter().collect()
    };

    // Fan the category streams into one channel for printing.
    let (tx, mut events) = mpsc::unbounded_channel();
    for category in categories {
        let mut rx = session.events(category);
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("{} output lagged, {} event(s) skipped", category, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
    drop(tx);

    session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.session_config().ws_url()))?;
    subscribe_all(&session, &topics).await?;

    let mut statuses = session.subscribe_status();
    let mut previous = session.status();
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            Some(event) = events.recv() => {
                println!("{}", serde_json::to_string(&event)?);
            }
            next = statuses.recv() => {
                let current = match next {
                    Ok(status) => status,
                    Err(broadcast::error::RecvError::Lagged(_)) => session.status(),
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                };
                match (&previous, &current) {
                    // The backend forgets subscriptions with the connection.
                    (SessionStatus::Reconnecting { .. }, SessionStatus::Connected) => {
                        subscribe_all(&session, &topics).await?;
                    }
                    (SessionStatus::Failed(reason), SessionStatus::Disconnected) => {
                        break Err(anyhow::anyhow!("Gave up reconnecting: {reason}"));
                    }
                    _ => {}
                }
                previous = current;
            }
        }
    };

    session.shutdown().await;
    result
}

async fn subscribe_all(session: &SessionService, topics: &[Topic]) -> Result<()> {
    for topic in topics {
        session
            .subscribe(topic.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {topic}"))?;
    }
    Ok(())
}

async fn send(config: &Config, topic: Topic, text: String) -> Result<()> {
    if topic.category != EventCategory::Chat {
        anyhow::bail!("send only supports chat topics, got {topic}");
    }

    let session = SessionService::new(config.session_config(), Arc::new(WsConnector));
    session.connect().await.context("Failed to connect")?;

    let command = OutboundCommand::Message {
        payload: MessagePayload::ChatMessage {
            chat_id: topic.id.clone(),
            content: text,
        },
        topic,
    };
    let sent = session.send(&command).await.context("Failed to send message");
    session.shutdown().await;
    sent?;

    println!("Sent");
    Ok(())
}
