//! Mock Broker Example
//!
//! Wires the full pipeline in-process:
//! LogPersistence -> QosSource -> Dispatcher -> consumers.
//! Three consumers acknowledge with a simulated processing delay; one of them
//! leaves halfway so its in-flight messages are redelivered to the others.
//!
//! Run with: cargo run -p mock_broker -- [broker.toml]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use config_loader::ConfigLoader;
use contracts::{handler, Message};
use dispatcher::{Consumer, Dispatcher};
use observability::{LogFormat, ObservabilityConfig};
use persistence::LogPersistence;
use qos::QosSource;
use tokio::sync::mpsc;

const TARGET_CHECKPOINT: u64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    observability::init_with_config(ObservabilityConfig {
        log_format: LogFormat::Compact,
        ..Default::default()
    })?;

    tracing::info!("Starting Mock Broker Demo");

    // ==== Stage 1: Use default config or load from file ====
    let path = std::env::args().nth(1).map(std::path::PathBuf::from);
    if let Some(path) = &path {
        tracing::info!(path = %path.display(), "Loading broker config");
    }
    let config =
        ConfigLoader::load_or_default(path.as_deref()).context("loading broker config")?;

    // ==== Stage 2: Persistence + rate-limited source ====
    let persistence = LogPersistence::from_config(&config.persistence);
    let source = Arc::new(QosSource::new(config.source.clone(), persistence));

    // ==== Stage 3: Dispatcher ====
    let dispatcher = Dispatcher::new(&config.dispatcher, source.clone())?;
    let event_loop = dispatcher.spawn();

    let consumers: Vec<Arc<Consumer>> = [1, 2, 5]
        .into_iter()
        .map(|delay_ms| spawn_consumer(&dispatcher, Duration::from_millis(delay_ms)))
        .collect();
    tracing::info!(consumers = consumers.len(), "Consumers registered");

    // ==== Stage 4: Run until the durable checkpoint reaches the target ====
    let leaver = Arc::clone(&consumers[2]);
    let progress = async {
        let mut left = false;
        loop {
            let checkpoint = source.persistence().checkpoint();
            if !left && checkpoint >= TARGET_CHECKPOINT / 2 {
                tracing::info!(
                    consumer_id = leaver.id(),
                    pending = leaver.pending(),
                    "Consumer leaving"
                );
                leaver.unregister();
                left = true;
            }
            if checkpoint >= TARGET_CHECKPOINT {
                return checkpoint;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    let result = tokio::time::timeout(Duration::from_secs(30), progress).await;

    // ==== Stage 5: Cleanup ====
    tracing::info!("Shutting down and cleaning up...");
    for consumer in &consumers {
        consumer.unregister();
    }
    dispatcher.shutdown();
    event_loop.await?;
    source.shutdown().await?;

    match result {
        Ok(checkpoint) => tracing::info!(checkpoint, "Broker demo completed successfully"),
        Err(_) => tracing::warn!("Broker demo timed out"),
    }
    let stats = source.persistence().stats();
    tracing::info!(
        acks = stats.acks,
        sents = stats.sents,
        duplicates = stats.duplicates,
        checkpoint = stats.checkpoint,
        "Persistence statistics"
    );

    Ok(())
}

/// Register a consumer acknowledging each message after `delay`
fn spawn_consumer(dispatcher: &Dispatcher, delay: Duration) -> Arc<Consumer> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let consumer = dispatcher.register(handler(move |msg: &Message| {
        tx.send(msg.clone())
            .map_err(|_| contracts::ContractError::Other("consumer task stopped".into()))
    }));

    let acker = Arc::clone(&consumer);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            tokio::time::sleep(delay).await;
            tracing::debug!(consumer_id = acker.id(), message_id = msg.id(), "Processed message");
            acker.ack(&msg, false);
        }
    });
    consumer
}
