//! Email verification codes, stored alongside the user they belong to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use platform_transaction::{TxContext, TxError, TxManager};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: TxError,
    },
}

impl From<TxError> for VerificationError {
    fn from(source: TxError) -> Self {
        VerificationError::Storage {
            op: "verification transaction",
            source,
        }
    }
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Replaces any code already pending for `user_id`.
    async fn save(
        &self,
        ctx: &TxContext,
        user_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), VerificationError>;

    /// Delete the pending code if it matches and has not expired at `now`.
    ///
    /// Returns false when nothing matched; a wrong code leaves the pending
    /// one in place.
    async fn consume(
        &self,
        ctx: &TxContext,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, VerificationError>;
}

#[derive(Clone)]
pub struct PgVerificationRepository {
    tx: TxManager,
}

impl PgVerificationRepository {
    pub fn new(tx: TxManager) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl VerificationStore for PgVerificationRepository {
    async fn save(
        &self,
        ctx: &TxContext,
        user_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        self.tx
            .executor(ctx)
            .execute(
                sqlx::query(
                    r#"
                    INSERT INTO verification_codes (user_id, code, expires_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (user_id) DO UPDATE
                    SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at
                    "#,
                )
                .bind(user_id)
                .bind(code)
                .bind(expires_at),
            )
            .await
            .map_err(|source| VerificationError::Storage {
                op: "verification save",
                source,
            })?;

        Ok(())
    }

    async fn consume(
        &self,
        ctx: &TxContext,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, VerificationError> {
        let result = self
            .tx
            .executor(ctx)
            .execute(
                sqlx::query(
                    r#"
                    DELETE FROM verification_codes
                    WHERE user_id = $1 AND code = $2 AND expires_at > $3
                    "#,
                )
                .bind(user_id)
                .bind(code)
                .bind(now),
            )
            .await
            .map_err(|source| VerificationError::Storage {
                op: "verification consume",
                source,
            })?;

        Ok(result.rows_affected() == 1)
    }
}
