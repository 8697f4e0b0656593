//! # Broker boundary
//!
//! Everything a service needs to put events on a broker and take them off
//! again with at-least-once semantics.
//!
//! ## Producing
//!
//! [`AsyncProducer`] queues messages and returns immediately. A background
//! dispatcher hands them to a [`Transport`] and awaits broker
//! acknowledgements; a success drain passes each acknowledged message's
//! correlation [`Message::metadata`] to an [`OnSuccess`] callback, an error
//! drain logs failures. Nothing is reported as delivered before the broker
//! acknowledged it.
//!
//! ## Consuming
//!
//! [`Consumer`] joins a [`ConsumerGroup`] and feeds deliveries through an
//! ordered middleware chain (see [`middleware`]). A delivery is acked only
//! when the chain returns `Ok`, so failures are redelivered on the next
//! session.
//!
//! ## Implementations
//!
//! - **NatsBus / NatsGroup**: JetStream publish with ack futures and durable
//!   pull consumers
//! - **InMemoryBus / InMemoryGroup**: partitioned in-process logs with
//!   per-group acked offsets, for tests and local development
//!
//! ```rust,no_run
//! use event_bus::{AsyncProducer, InMemoryBus, Message, Producer, ProducerConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), event_bus::BusError> {
//! let bus = InMemoryBus::new();
//! let producer = AsyncProducer::start(
//!     Arc::new(bus.clone()),
//!     ProducerConfig::for_topic("user-registered"),
//!     None,
//! );
//! producer
//!     .send(Message::new("", b"{}".to_vec()), &CancellationToken::new())
//!     .await?;
//! producer.close().await;
//! # Ok(())
//! # }
//! ```

mod consumer;
mod envelope;
mod inmemory_bus;
pub mod middleware;
mod nats_bus;
mod producer;

pub use consumer::{Acker, Consumer, ConsumerConfig, ConsumerGroup, Delivery};
pub use envelope::{peek_event_id, EventMeta};
pub use inmemory_bus::{InMemoryBus, InMemoryGroup};
pub use middleware::{HandlerError, MessageHandler, Middleware};
pub use nats_bus::{NatsBus, NatsGroup};
pub use producer::{AckFuture, AsyncProducer, OnSuccess, Producer, ProducerConfig, Transport};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Wire envelope exchanged with the broker.
///
/// `metadata` is a producer-side correlation token. It is handed back to the
/// producer's success callback and never written to the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Header names are unique; inserting an existing name overwrites it.
    pub headers: HashMap<String, Vec<u8>>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            value,
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = key;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.headers.insert(name.into(), value);
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(Vec::as_slice)
    }
}

/// Errors that can occur at the broker boundary
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe: {0}")]
    SubscribeError(String),

    #[error("failed to ack message: {0}")]
    AckError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("consumer group closed")]
    GroupClosed,

    #[error("producer closed")]
    ProducerClosed,

    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for broker operations
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_header_overwrites() {
        let msg = Message::new("t", vec![])
            .with_header("trace", b"a".to_vec())
            .with_header("trace", b"b".to_vec());
        assert_eq!(msg.headers.len(), 1);
        assert_eq!(msg.header("trace"), Some(&b"b"[..]));
        assert_eq!(msg.header("missing"), None);
    }
}
