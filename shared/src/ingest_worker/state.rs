// ============================================================================
// Ingest Worker State
// ============================================================================
//
// Everything a worker needs to process a record, shared by all workers of a
// process. The consumer itself is not part of it: each worker owns one.
//
// ============================================================================

use std::sync::Arc;

use crate::ingest_worker::reconciler::UserReconciler;
use crate::kafka::BrokerProducer;
use crate::store::ChatStore;
use chat_config::{KafkaConfig, LoggingConfig, WorkerConfig};

pub struct WorkerState {
    pub store: Arc<dyn ChatStore>,
    pub reconciler: UserReconciler,
    /// Producer used only for the dead-letter topic
    pub dlq_producer: Arc<dyn BrokerProducer>,
    pub dlq_topic: String,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl WorkerState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        dlq_producer: Arc<dyn BrokerProducer>,
        kafka: &KafkaConfig,
        worker: WorkerConfig,
        logging: LoggingConfig,
    ) -> Self {
        Self {
            reconciler: UserReconciler::new(store.clone()),
            store,
            dlq_producer,
            dlq_topic: kafka.dlq_topic(),
            worker,
            logging,
        }
    }
}
