//! Outbox repository for reliable event publishing
//!
//! Uses the transactional outbox pattern: rows are written in the same
//! transaction as the domain change and picked up later by the relay.

use async_trait::async_trait;
use platform_transaction::{TxContext, TxError, TxManager};
use uuid::Uuid;

use crate::models::OutboxEvent;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox insert requires an ambient transaction")]
    NoTransaction,

    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: TxError,
    },
}

impl From<TxError> for OutboxError {
    fn from(source: TxError) -> Self {
        OutboxError::Storage {
            op: "outbox transaction",
            source,
        }
    }
}

fn storage(op: &'static str) -> impl FnOnce(TxError) -> OutboxError {
    move |source| OutboxError::Storage { op, source }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Must run inside the business transaction it belongs to.
    async fn insert(&self, ctx: &TxContext, event: &OutboxEvent) -> Result<(), OutboxError>;

    /// Oldest unsent rows first, skipping rows another relay has claimed.
    async fn fetch_unsent(&self, ctx: &TxContext, limit: i64) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Idempotent.
    async fn mark_sent(&self, ctx: &TxContext, event_id: Uuid) -> Result<(), OutboxError>;

    /// Delete rows already marked sent; returns how many were removed.
    async fn delete_sent(&self, ctx: &TxContext) -> Result<u64, OutboxError>;
}

#[derive(Clone)]
pub struct PgOutboxRepository {
    tx: TxManager,
}

impl PgOutboxRepository {
    pub fn new(tx: TxManager) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxRepository {
    async fn insert(&self, ctx: &TxContext, event: &OutboxEvent) -> Result<(), OutboxError> {
        if !ctx.in_transaction() {
            return Err(OutboxError::NoTransaction);
        }

        self.tx
            .executor(ctx)
            .execute(
                sqlx::query(
                    r#"
                    INSERT INTO outbox (event_id, topic, key, value, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(event.event_id)
                .bind(&event.topic)
                .bind(&event.key)
                .bind(&event.value)
                .bind(event.created_at),
            )
            .await
            .map_err(storage("outbox insert"))?;

        Ok(())
    }

    async fn fetch_unsent(&self, ctx: &TxContext, limit: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        self.tx
            .executor(ctx)
            .fetch_all(
                sqlx::query_as::<_, OutboxEvent>(
                    r#"
                    SELECT event_id, topic, key, value, created_at, is_sent
                    FROM outbox
                    WHERE NOT is_sent
                    ORDER BY created_at
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                    "#,
                )
                .bind(limit),
            )
            .await
            .map_err(storage("outbox fetch unsent"))
    }

    async fn mark_sent(&self, ctx: &TxContext, event_id: Uuid) -> Result<(), OutboxError> {
        self.tx
            .executor(ctx)
            .execute(sqlx::query("UPDATE outbox SET is_sent = TRUE WHERE event_id = $1").bind(event_id))
            .await
            .map_err(storage("outbox mark sent"))?;

        Ok(())
    }

    async fn delete_sent(&self, ctx: &TxContext) -> Result<u64, OutboxError> {
        let result = self
            .tx
            .executor(ctx)
            .execute(sqlx::query("DELETE FROM outbox WHERE is_sent"))
            .await
            .map_err(storage("outbox delete sent"))?;

        Ok(result.rows_affected())
    }
}
