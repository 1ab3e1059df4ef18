//! # palaver
//!
//! Terminal demo of the Palaver sync layer. Seeds an in-process remote,
//! logs in, runs the bulk sync, renders the conversation list and one
//! conversation cache-first, then sends a message and waits for a reply
//! on the live feed.
//!
//! Usage: `palaver [username] [password]` (defaults: `alice`, `password123`).

mod demo;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use palaver_remote::{MemoryGateway, RemoteGateway, Table};
use palaver_sync::{ChatClient, ConversationView, Source, SyncConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_sync=debug,palaver_store=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let username = args.next().unwrap_or_else(|| "alice".to_string());
    let password = args.next().unwrap_or_else(|| demo::DEMO_PASSWORD.to_string());

    let config = SyncConfig::from_env();
    info!(?config, "Loaded configuration");

    let remote = MemoryGateway::new();
    demo::seed(&remote)?;

    let mut client = ChatClient::new(config, Arc::new(remote.clone()))?;
    let report = client.login(&username, &password).await?;
    if !report.is_complete() {
        warn!(failed = ?report.failed, "bulk sync incomplete");
    }
    let me = client.session()?.user_id().clone();

    // -----------------------------------------------------------------------
    // Conversation list
    // -----------------------------------------------------------------------
    let reader = client.reader()?;
    let mut latest: Vec<ConversationView> = Vec::new();
    let mut list = reader.conversation_list();
    while let Some(snapshot) = list.next().await {
        println!("== conversations ({}) ==", source_name(snapshot.source));
        for view in &snapshot.data {
            let labels: Vec<&str> = view.labels.iter().map(|l| l.name.as_str()).collect();
            println!(
                "  {:<20} {:>2} unread  {:<24} {}",
                view.conversation.title,
                view.unread_count,
                view.conversation.last_message.as_deref().unwrap_or(""),
                labels.join(", "),
            );
        }
        latest = snapshot.data;
    }
    drop(list);

    let Some(first) = latest.first() else {
        println!("no conversations");
        return Ok(());
    };
    let conversation_id = first.conversation.id.clone();

    // -----------------------------------------------------------------------
    // One conversation
    // -----------------------------------------------------------------------
    if let Some(header) = reader.conversation_details(&conversation_id).await {
        let names: Vec<&str> = header
            .participants_info
            .iter()
            .map(|p| p.fullname.as_str())
            .collect();
        println!("== {} ({}) ==", header.conversation.title, names.join(", "));
    }

    let feed = client.open_conversation(&conversation_id).await?;

    let mut messages = Vec::new();
    let mut stream = reader.message_list(&conversation_id);
    while let Some(snapshot) = stream.next().await {
        messages = snapshot.data;
    }
    drop(stream);

    for bucket in client.group_by_day(messages) {
        println!("  -- {} --", bucket.day);
        for view in bucket.messages {
            println!(
                "  [{}] {}: {}",
                view.message.created_at.format("%H:%M"),
                view.sender.fullname,
                view.message.message
            );
        }
    }

    // -----------------------------------------------------------------------
    // Live feed
    // -----------------------------------------------------------------------
    let Some(mut feed) = feed else {
        info!("realtime disabled, done");
        client.logout();
        return Ok(());
    };

    let sent = feed.send("Hello from the terminal").await?;
    if let Some(sent) = &sent {
        println!("  [sent] {}", sent.message);
    }

    // Someone else in the conversation answers.
    if let Some(other) = first.conversation.others(&me).next() {
        remote
            .insert(
                Table::Messages,
                json!({
                    "conversation_id": conversation_id.as_str(),
                    "sender_id": other.as_str(),
                    "message": "Got it!",
                }),
            )
            .await?;
    }

    match tokio::time::timeout(Duration::from_secs(2), feed.next_message()).await {
        Ok(Some(view)) => println!("  [live] {}: {}", view.sender.fullname, view.message.message),
        Ok(None) => warn!("feed closed"),
        Err(_) => warn!("no reply within 2s"),
    }
    feed.close();

    client.logout();
    info!("demo finished");
    Ok(())
}

fn source_name(source: Source) -> &'static str {
    match source {
        Source::Local => "cached",
        Source::Remote => "fresh",
    }
}
