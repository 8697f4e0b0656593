//! Dead letter sink backed by the `failed_events` table.

use async_trait::async_trait;
use event_bus::middleware::{BoxError, DeadLetterSink};
use event_bus::{peek_event_id, HandlerError, Message};
use platform_transaction::TxContext;

use crate::repos::{FailedEvent, PgFailedEventRepository};

pub struct PgDeadLetterSink {
    repo: PgFailedEventRepository,
}

impl PgDeadLetterSink {
    pub fn new(repo: PgFailedEventRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn dead_letter(
        &self,
        msg: &Message,
        error: &HandlerError,
        attempts: u32,
    ) -> Result<(), BoxError> {
        let event = FailedEvent {
            event_id: peek_event_id(&msg.value),
            topic: msg.topic.clone(),
            partition: msg.partition,
            offset: msg.offset,
            payload: msg.value.clone(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            attempts: i32::try_from(attempts).unwrap_or(i32::MAX),
        };
        self.repo.insert(&TxContext::none(), &event).await?;

        tracing::warn!(
            event_id = ?event.event_id,
            topic = %msg.topic,
            offset = msg.offset,
            "message written to failed_events"
        );
        Ok(())
    }
}
