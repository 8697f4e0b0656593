//! Outbox relay: moves committed outbox rows onto the broker.
//!
//! Each poll claims a batch of unsent rows (`FOR UPDATE SKIP LOCKED`, so
//! several relays can run side by side) and queues them on the producer. The
//! rows are only marked sent later, from the producer's ack callback. A
//! separate, slower timer deletes rows that have been marked sent.

use event_bus::{BusError, Message, Producer};
use platform_transaction::{Transactor, TxContext, TxError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repos::{OutboxError, OutboxStore};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub fetch_limit: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
            fetch_limit: 100,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// The batch stopped at `event_id`; `sent` events were queued before it.
    #[error("send event {event_id} (after {sent} sent): {source}")]
    Send {
        sent: usize,
        event_id: Uuid,
        #[source]
        source: BusError,
    },

    #[error(transparent)]
    Tx(#[from] TxError),
}

pub struct Relay<T: Transactor> {
    store: Arc<dyn OutboxStore>,
    tx: T,
    producer: Arc<dyn Producer>,
    config: RelayConfig,
}

impl<T: Transactor> Relay<T> {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        tx: T,
        producer: Arc<dyn Producer>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            tx,
            producer,
            config,
        }
    }

    /// Poll and clean up on their timers until `shutdown` fires.
    ///
    /// Zero intervals are raised to one millisecond.
    pub async fn run(&self, shutdown: CancellationToken) {
        let poll_interval = self.config.poll_interval.max(MIN_INTERVAL);
        let cleanup_interval = self.config.cleanup_interval.max(MIN_INTERVAL);
        let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = interval_at(Instant::now() + cleanup_interval, cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            fetch_limit = self.config.fetch_limit,
            "outbox relay started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("outbox relay stopped");
                    return;
                }
                _ = poll.tick() => match self.poll(&shutdown).await {
                    Ok(0) => {}
                    Ok(sent) => debug!(sent, "outbox batch queued"),
                    Err(RelayError::Send { source: BusError::Cancelled, .. }) => {}
                    Err(e) => error!(error = %e, "outbox poll failed"),
                },
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        warn!(error = %e, "outbox cleanup failed");
                    }
                }
            }
        }
    }

    /// Queue up to `fetch_limit` unsent events.
    ///
    /// Stops at the first send failure; events from that one on stay unsent
    /// for the next poll. Returns how many events were queued.
    pub async fn poll(&self, cancel: &CancellationToken) -> Result<usize, RelayError> {
        let store = self.store.clone();
        let producer = self.producer.clone();
        let cancel = cancel.clone();
        let limit = self.config.fetch_limit;

        // The claim locks are held until every event in the batch is queued.
        let root = TxContext::none();
        let fut: Pin<Box<dyn Future<Output = Result<usize, RelayError>> + Send + '_>> =
            Box::pin(self.tx.wrap(&root, move |ctx| async move {
                let events = store.fetch_unsent(&ctx, limit).await?;
                let mut sent = 0;
                for event in events {
                    let msg = Message::new(event.topic, event.value)
                        .with_key(event.key)
                        .with_metadata(event.event_id.to_string());
                    if let Err(source) = producer.send(msg, &cancel).await {
                        return Err(RelayError::Send {
                            sent,
                            event_id: event.event_id,
                            source,
                        });
                    }
                    sent += 1;
                }
                Ok(sent)
            }));
        fut.await
    }

    /// Best-effort delete of rows already marked sent.
    pub async fn cleanup(&self) -> Result<u64, OutboxError> {
        let deleted = self.store.delete_sent(&TxContext::none()).await?;
        if deleted > 0 {
            debug!(deleted, "deleted sent outbox events");
        }
        Ok(deleted)
    }
}
