// Ingest worker: consumes chat envelopes and persists them.
//
// Modules:
// - state: shared dependencies (store, reconciler, DLQ producer, config)
// - reconciler: creates or updates the sender from envelope metadata
// - processor: one record -> ProcessResult
// - dlq: dead-letter topic for malformed records
// - consumer_loop: batching, acknowledgment, seek-back, shutdown

pub mod consumer_loop;
pub mod dlq;
pub mod processor;
pub mod reconciler;
pub mod state;

pub use consumer_loop::{
    poll_and_process, process_batch, run_consumer_loop, BatchSummary, RewindFailed,
};
pub use dlq::{send_to_dlq, DeadLetterRecord};
pub use processor::{process_record, ProcessResult};
pub use reconciler::{ProfileField, ReconcileOutcome, Reconciled, UserReconciler};
pub use state::WorkerState;
