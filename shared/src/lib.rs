//! # Chat Ingest Shared
//!
//! The asynchronous chat-message pipeline: the publisher that puts
//! envelopes on Kafka, the ingest worker that persists them, and the
//! storage and broker seams both are written against.

pub mod ingest_worker;
pub mod kafka;
pub mod publisher;
pub mod store;
pub mod utils;

pub use publisher::{PublishError, PublishHandle, PublishReceipt, Publisher, SubmitOutcome};
