// ============================================================================
// Ingest Worker - persists chat messages from Kafka
// ============================================================================
//
// Consumes chat envelopes from the chat topic and writes them to PostgreSQL.
//
// Key Principle: an offset is committed ONLY after the message (and its
// sender) are persisted. Anything else is redelivered.
//
// Flow per record:
// 1. Decode envelope (malformed -> {topic}-dlq, then commit)
// 2. Reconcile sender into `users`
// 3. Insert into `messages` (dedup key makes redelivery a no-op)
// 4. Commit offset
//
// Guarantees:
// - At-least-once processing, no duplicate rows
// - Ordering per sender (Kafka partitioning by sender id)
//
// ============================================================================

use anyhow::{Context, Result};
use chat_config::Config;
use chat_ingest_shared::ingest_worker::{run_consumer_loop, WorkerState};
use chat_ingest_shared::kafka::{BrokerConsumer, KafkaConsumer, KafkaProducer};
use chat_ingest_shared::store::PgChatStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Ingest Worker Starting ===");
    if config.logging.salt_missing() {
        warn!("LOG_HASH_SALT not set, using an empty salt for log identifiers");
    }
    info!("Kafka Enabled: {}", config.kafka.enabled);
    info!("Kafka Brokers: {}", config.kafka.brokers);
    info!("Kafka Topic: {}", config.kafka.topic);
    info!("Kafka Consumer Group: {}", config.kafka.consumer_group);
    info!("Workers: {}", config.worker.concurrency);

    if !config.kafka.enabled {
        error!("Ingest worker requires Kafka. Please set KAFKA_ENABLED=true");
        anyhow::bail!("Kafka is disabled; nothing to consume");
    }

    let db_config = chat_db::DbConfig {
        max_connections: config.db.max_connections,
        acquire_timeout_secs: config.db.acquire_timeout_secs,
        idle_timeout_secs: config.db.idle_timeout_secs,
    };
    let pool = chat_db::create_pool(&config.database_url, &db_config).await?;
    info!("Connected to PostgreSQL");

    if config.db.run_migrations {
        chat_db::run_migrations(&pool).await?;
    }

    let dlq_producer = Arc::new(
        KafkaProducer::new(&config.kafka).context("Failed to initialize Kafka DLQ producer")?,
    );
    let state = Arc::new(WorkerState::new(
        Arc::new(PgChatStore::new(pool)),
        dlq_producer,
        &config.kafka,
        config.worker.clone(),
        config.logging.clone(),
    ));

    // Shutdown flag - set to true on SIGTERM/Ctrl-C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown_signal.store(true, Ordering::SeqCst);
    });

    let mut workers = Vec::with_capacity(config.worker.concurrency);
    for worker_id in 0..config.worker.concurrency {
        let consumer: Arc<dyn BrokerConsumer> = Arc::new(
            KafkaConsumer::new(&config.kafka).context("Failed to initialize Kafka consumer")?,
        );
        workers.push(tokio::spawn(run_consumer_loop(
            state.clone(),
            consumer,
            shutdown.clone(),
            worker_id,
        )));
    }

    let mut result = Ok(());
    for (worker_id, handle) in workers.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // the failed worker's consumer is dropped and leaves the group;
                // its partitions resume from the committed offsets elsewhere
                error!(worker_id, error = %e, "Ingest worker failed");
                result = Err(e);
            }
            Err(e) => {
                error!(worker_id, error = %e, "Ingest worker task panicked");
                result = Err(anyhow::anyhow!("worker {} panicked: {}", worker_id, e));
            }
        }
    }

    info!("Ingest worker stopped");
    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, initiating graceful shutdown...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("SIGINT received, initiating graceful shutdown...");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler, listening for Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
                info!("SIGINT received, initiating graceful shutdown...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, initiating graceful shutdown...");
    }
}
