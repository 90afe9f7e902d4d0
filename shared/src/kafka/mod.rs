// Kafka plumbing for the chat pipeline
//
// Envelope type and codec, the broker traits the publisher and ingest worker
// are written against, and their rdkafka and in-memory implementations.

pub mod broker;
pub mod circuit_breaker;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod memory;
pub mod metrics;
pub mod producer;
pub mod types;

// Re-export commonly used types
pub use broker::{BrokerConsumer, BrokerProducer, ConsumedRecord, DeliveryReceipt};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use codec::{decode, encode, CodecError};
pub use config::create_client_config;
pub use consumer::KafkaConsumer;
pub use memory::{MemoryBroker, MemoryConsumer};
pub use producer::KafkaProducer;
pub use types::{validate_content, EnvelopeError, MessageEnvelope, SenderIdentity};

#[cfg(test)]
pub(crate) fn test_kafka_config(enabled: bool) -> chat_config::KafkaConfig {
    chat_config::KafkaConfig {
        enabled,
        brokers: "localhost:9092".to_string(),
        topic: "chat-messages".to_string(),
        consumer_group: "chat-service-group".to_string(),
        ssl_enabled: false,
        sasl_mechanism: None,
        sasl_username: None,
        sasl_password: None,
        ssl_ca_location: None,
        producer_compression: "snappy".to_string(),
        producer_acks: "all".to_string(),
        producer_linger_ms: 10,
        producer_batch_size: 16384,
        producer_max_in_flight: 5,
        producer_retries: 3,
        producer_request_timeout_ms: 15000,
        producer_delivery_timeout_ms: 30000,
        producer_enable_idempotence: true,
    }
}
