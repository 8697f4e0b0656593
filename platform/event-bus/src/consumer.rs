//! Consumer-group loop
//!
//! One [`Consumer::consume`] call owns one group member. Each session joins
//! the group and processes deliveries until the broker ends the session
//! (rebalance) or fails; the loop then rejoins. Only an explicitly closed
//! group or the shutdown token end the loop.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::middleware::{chain, MessageHandler, Middleware};
use crate::{BusError, BusResult, Message};

/// Commits a single delivery back to the broker.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> BusResult<()>;
}

/// A message plus the means to commit it.
pub struct Delivery {
    message: Message,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acker>) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_parts(self) -> (Message, Box<dyn Acker>) {
        (self.message, self.acker)
    }

    pub async fn ack(self) -> BusResult<()> {
        self.acker.ack().await
    }
}

/// Broker consumer-group membership.
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Start a session. Deliveries arrive in offset order per partition.
    /// The stream ends when the broker rebalances the group; it yields
    /// [`BusError::GroupClosed`] once this member has been closed.
    async fn join(&self, topics: &[String]) -> BusResult<BoxStream<'static, BusResult<Delivery>>>;

    /// Leave the group. Further joins fail with [`BusError::GroupClosed`].
    async fn close(&self) -> BusResult<()>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topics: Vec<String>,
    /// Pause before rejoining after a failed session
    pub session_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            session_backoff: Duration::from_secs(1),
        }
    }
}

pub struct Consumer {
    group: Arc<dyn ConsumerGroup>,
    config: ConsumerConfig,
    middlewares: Vec<Middleware>,
}

impl Consumer {
    pub fn new(group: Arc<dyn ConsumerGroup>, config: ConsumerConfig) -> Self {
        Self {
            group,
            config,
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware. The first one added is the outermost.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Run sessions until the group is closed or `shutdown` fires.
    pub async fn consume(
        &self,
        shutdown: CancellationToken,
        handler: MessageHandler,
    ) -> BusResult<()> {
        let handler = chain(&self.middlewares, handler);

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            match self.session(&shutdown, &handler).await {
                Ok(()) if shutdown.is_cancelled() => return Ok(()),
                Ok(()) => {
                    tracing::info!(topics = ?self.config.topics, "consumer session ended, rejoining group");
                }
                Err(BusError::GroupClosed) => {
                    tracing::info!(topics = ?self.config.topics, "consumer group closed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(topics = ?self.config.topics, error = %e, "consumer session failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.config.session_backoff) => {}
                    }
                }
            }
        }
    }

    pub async fn close(&self) -> BusResult<()> {
        self.group.close().await
    }

    async fn session(&self, shutdown: &CancellationToken, handler: &MessageHandler) -> BusResult<()> {
        let mut deliveries = self.group.join(&self.config.topics).await?;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };
            let Some(delivery) = next else {
                return Ok(());
            };

            let (message, acker) = delivery?.into_parts();
            let (topic, partition, offset) = (message.topic.clone(), message.partition, message.offset);

            match handler(message).await {
                Ok(()) => acker.ack().await?,
                Err(e) => tracing::warn!(
                    topic = %topic,
                    partition,
                    offset,
                    error = %e,
                    "message not handled, leaving uncommitted"
                ),
            }
        }
    }
}
