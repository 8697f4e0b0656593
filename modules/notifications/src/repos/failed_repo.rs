use platform_transaction::{TxContext, TxManager};
use uuid::Uuid;

use crate::repos::RepoError;

/// A message that exhausted its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    pub event_id: Option<Uuid>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
    pub error: String,
    pub error_kind: String,
    pub attempts: i32,
}

#[derive(Clone)]
pub struct PgFailedEventRepository {
    tx: TxManager,
}

impl PgFailedEventRepository {
    pub fn new(tx: TxManager) -> Self {
        Self { tx }
    }

    /// Insert a failed event into the dead letter table
    pub async fn insert(&self, ctx: &TxContext, event: &FailedEvent) -> Result<(), RepoError> {
        self.tx
            .executor(ctx)
            .execute(
                sqlx::query(
                    r#"
                    INSERT INTO failed_events
                        (event_id, topic, partition, "offset", payload, error, error_kind, attempts)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(event.event_id)
                .bind(&event.topic)
                .bind(event.partition)
                .bind(event.offset)
                .bind(&event.payload)
                .bind(&event.error)
                .bind(&event.error_kind)
                .bind(event.attempts),
            )
            .await
            .map_err(|source| RepoError::Storage {
                op: "insert failed event",
                source,
            })?;

        Ok(())
    }

    pub async fn count_for(&self, ctx: &TxContext, event_id: Uuid) -> Result<i64, RepoError> {
        let row: Option<(i64,)> = self
            .tx
            .executor(ctx)
            .fetch_optional(
                sqlx::query_as("SELECT COUNT(*) FROM failed_events WHERE event_id = $1").bind(event_id),
            )
            .await
            .map_err(|source| RepoError::Storage {
                op: "count failed events",
                source,
            })?;

        Ok(row.map(|(n,)| n).unwrap_or(0))
    }
}
