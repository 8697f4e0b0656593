//! Processed-event markers: one row per event whose side effect committed.

use async_trait::async_trait;
use platform_transaction::{TxContext, TxError, TxManager};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: TxError,
    },
}

impl From<TxError> for RepoError {
    fn from(source: TxError) -> Self {
        RepoError::Storage {
            op: "processed events transaction",
            source,
        }
    }
}

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Record `event_id` as processed.
    ///
    /// Returns `false` when it was already recorded. Call it in the same
    /// transaction as the side effect it guards.
    async fn mark_processed(&self, ctx: &TxContext, event_id: Uuid) -> Result<bool, RepoError>;

    /// Delete markers older than `retention`; returns how many were removed.
    async fn delete_older_than(&self, ctx: &TxContext, retention: Duration) -> Result<u64, RepoError>;
}

#[derive(Clone)]
pub struct PgProcessedEventRepository {
    tx: TxManager,
}

impl PgProcessedEventRepository {
    pub fn new(tx: TxManager) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProcessedEventStore for PgProcessedEventRepository {
    async fn mark_processed(&self, ctx: &TxContext, event_id: Uuid) -> Result<bool, RepoError> {
        let result = self
            .tx
            .executor(ctx)
            .execute(
                sqlx::query(
                    r#"
                    INSERT INTO processed_events (event_id)
                    VALUES ($1)
                    ON CONFLICT (event_id) DO NOTHING
                    "#,
                )
                .bind(event_id),
            )
            .await
            .map_err(|source| RepoError::Storage {
                op: "mark processed",
                source,
            })?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_older_than(&self, ctx: &TxContext, retention: Duration) -> Result<u64, RepoError> {
        // A retention beyond the representable range keeps everything
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| chrono::Utc::now().checked_sub_signed(r))
        else {
            return Ok(0);
        };

        let result = self
            .tx
            .executor(ctx)
            .execute(
                sqlx::query("DELETE FROM processed_events WHERE processed_at < $1").bind(cutoff),
            )
            .await
            .map_err(|source| RepoError::Storage {
                op: "delete old processed events",
                source,
            })?;

        Ok(result.rows_affected())
    }
}
