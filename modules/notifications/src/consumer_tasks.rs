use event_bus::middleware::{logging, recovery, with_retry, with_retry_and_dead_letter, DeadLetterSink};
use event_bus::{Consumer, ConsumerConfig, ConsumerGroup, MessageHandler};
use platform_transaction::TxContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::repos::ProcessedEventStore;

/// Consumer for `topics` with the standard chain:
/// recovery, logging, then retry (dead-lettering exhausted messages when a
/// sink is given, dropping them otherwise).
pub fn build_consumer(
    group: Arc<dyn ConsumerGroup>,
    topics: Vec<String>,
    max_retries: u32,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
) -> Consumer {
    let retry = match dead_letters {
        Some(sink) => with_retry_and_dead_letter(max_retries, sink),
        None => with_retry(max_retries),
    };

    Consumer::new(group, ConsumerConfig::new(topics))
        .with_middleware(recovery())
        .with_middleware(logging())
        .with_middleware(retry)
}

/// Start the consumer loop for user registration events
pub fn start_user_registered_consumer(
    consumer: Consumer,
    handler: MessageHandler,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Starting user registered consumer");

        if let Err(e) = consumer.consume(shutdown, handler).await {
            tracing::error!(error = %e, "user registered consumer failed");
        }

        tracing::info!("User registered consumer stopped");
    })
}

/// Periodically delete processed markers older than `retention`.
///
/// The first sweep runs one `interval` after start. Failures are logged and
/// the next tick tries again.
pub fn start_retention_sweep(
    store: Arc<dyn ProcessedEventStore>,
    interval: Duration,
    retention: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match store.delete_older_than(&TxContext::none(), retention).await {
                        Ok(0) => {}
                        Ok(deleted) => tracing::info!(deleted, "swept old processed events"),
                        Err(e) => tracing::error!(error = %e, "processed events sweep failed"),
                    }
                }
            }
        }

        tracing::info!("Retention sweep stopped");
    })
}
