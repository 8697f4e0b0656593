//! Idempotent handling of `user-registered` events.
//!
//! Each event moves through parse, TTL check, then one transaction that
//! inserts the processed marker and sends the email. The marker commits only
//! if the email went out, and a redelivered event finds the marker and does
//! nothing.

use event_bus::middleware::handler_fn;
use event_bus::{HandlerError, Message, MessageHandler};
use platform_transaction::{Transactor, TxContext, TxError};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::email_sender::{EmailError, EmailSender};
use crate::models::UserRegisteredEvent;
use crate::repos::{ProcessedEventStore, RepoError};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("decode event: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Tx(#[from] TxError),
}

impl From<NotificationError> for HandlerError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Malformed(e) => HandlerError::Malformed(e.to_string()),
            other => HandlerError::failed(other),
        }
    }
}

/// What happened to an event that was handled without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Duplicate,
    Expired,
}

pub struct IdempotentEventHandler<T: Transactor> {
    tx: T,
    processed: Arc<dyn ProcessedEventStore>,
    sender: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl<T: Transactor + 'static> IdempotentEventHandler<T> {
    pub fn new(
        tx: T,
        processed: Arc<dyn ProcessedEventStore>,
        sender: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            tx,
            processed,
            sender,
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub async fn handle(&self, msg: &Message) -> Result<Outcome, NotificationError> {
        let event: UserRegisteredEvent =
            serde_json::from_slice(&msg.value).map_err(NotificationError::Malformed)?;
        let event_id = event.meta.event_id;

        if event.meta.is_expired(self.clock.now(), self.ttl) {
            tracing::warn!(
                event_id = %event_id,
                created_at = %event.meta.created_at,
                "event TTL expired, skipping"
            );
            return Ok(Outcome::Expired);
        }

        let processed = self.processed.clone();
        let sender = self.sender.clone();
        let outcome = self
            .tx
            .wrap(&TxContext::none(), move |ctx| async move {
                if !processed.mark_processed(&ctx, event_id).await? {
                    return Ok(Outcome::Duplicate);
                }
                sender.send(&event).await?;
                Ok::<_, NotificationError>(Outcome::Delivered)
            })
            .await?;

        if outcome == Outcome::Duplicate {
            tracing::info!(event_id = %event_id, "duplicate event, skipping");
        }
        Ok(outcome)
    }

    /// Adapt to the consumer's handler signature.
    pub fn into_message_handler(self) -> MessageHandler {
        let handler = Arc::new(self);
        handler_fn(move |msg: Message| {
            let handler = handler.clone();
            async move {
                handler.handle(&msg).await?;
                Ok(())
            }
        })
    }
}
