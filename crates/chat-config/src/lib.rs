// ============================================================================
// Chat Config - Centralized configuration management
// ============================================================================
//
// Configuration for the publisher and the ingest workers.
// Loaded from environment variables (and an optional .env file) with
// defaults suitable for a local Kafka + PostgreSQL setup.
//
// ============================================================================

mod constants;
mod database;
mod kafka;
mod logging;
mod publisher;
mod worker;

pub use constants::{DLQ_TOPIC_SUFFIX, MAX_MESSAGE_LENGTH};
pub use database::DbConfig;
pub use kafka::KafkaConfig;
pub use logging::LoggingConfig;
pub use publisher::PublisherConfig;
pub use worker::WorkerConfig;

use anyhow::{Context, Result};

/// Main configuration structure
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub rust_log: String,

    // Sub-configurations
    pub logging: LoggingConfig,
    pub kafka: KafkaConfig,
    pub db: DbConfig,
    pub worker: WorkerConfig,
    pub publisher: PublisherConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let logging = LoggingConfig::from_env();
        let kafka = KafkaConfig::from_env();
        let db = DbConfig::from_env();
        let worker = WorkerConfig::from_env();
        let publisher = PublisherConfig::from_env();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            logging,
            kafka,
            db,
            worker,
            publisher,
        })
    }
}
