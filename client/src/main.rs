//! Demo of a chat-style session against the in-memory backend.

use std::time::Duration;

use serde_json::json;
use synclist_client::{Config, MemoryBackend, SessionEvent, SyncSession};
use synclist_engine::Record;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synclist_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Synclist demo on topic '{}'", config.topic);

    let backend = MemoryBackend::new_shared();
    backend.seed(
        &config.topic,
        vec![Record::confirmed(
            "welcome",
            synclist_client::now_millis().saturating_sub(60_000),
            json!({"author": "system", "text": "Welcome!", "isRead": true}),
        )],
    );

    let session = SyncSession::open(backend.clone(), config.topic.clone(), config.session()).await?;
    let mut events = session.events();

    // Shows up immediately, then gets replaced by the stored row
    let confirmed = session
        .send_confirmed(json!({"author": "me", "text": "hi there", "isRead": false}))
        .await?;
    tracing::info!("Message stored as {}", confirmed.id);

    // Someone else writes, then reads our message
    let reply = backend.insert_remote(
        &config.topic,
        json!({"author": "friend", "text": "hey!", "isRead": false}),
    );
    backend.update(&config.topic, &confirmed.id, &json!({"isRead": true}));

    // A rejected write is retracted
    backend.fail_next_writes(1);
    let temp_id = session.send(json!({"author": "me", "text": "lost"})).await?;
    tracing::info!("Sent {} (will be rejected)", temp_id);

    let deadline = tokio::time::sleep(Duration::from_millis(200));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Error(e)) => tracing::warn!("Session error: {}", e),
                Ok(event) => tracing::debug!("Session event: {:?}", event),
                Err(_) => break,
            },
            _ = &mut deadline => break,
        }
    }

    for record in session.view() {
        println!(
            "{:>13} {:<12} {}",
            record.created_at,
            if record.id == reply.id { "(remote)" } else { "" },
            record.payload
        );
    }

    session.close().await;
    Ok(())
}
