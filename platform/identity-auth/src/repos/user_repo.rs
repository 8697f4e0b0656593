use async_trait::async_trait;
use platform_transaction::{TxContext, TxError, TxManager};
use uuid::Uuid;

use crate::models::User;

#[derive(Debug, thiserror::Error)]
pub enum UserRepoError {
    #[error("email already registered")]
    EmailTaken,

    #[error("user storage: {0}")]
    Storage(#[source] TxError),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, ctx: &TxContext, user: &User) -> Result<(), UserRepoError>;

    /// Returns false when no such user exists.
    async fn confirm_email(&self, ctx: &TxContext, user_id: Uuid) -> Result<bool, UserRepoError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    tx: TxManager,
}

impl PgUserRepository {
    pub fn new(tx: TxManager) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl UserStore for PgUserRepository {
    async fn create(&self, ctx: &TxContext, user: &User) -> Result<(), UserRepoError> {
        let res = self
            .tx
            .executor(ctx)
            .execute(
                sqlx::query(
                    r#"
                    INSERT INTO users (id, email, hashed_password, created_at)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(user.id)
                .bind(&user.email)
                .bind(&user.hashed_password)
                .bind(user.created_at),
            )
            .await;

        match res {
            Ok(_) => Ok(()),
            Err(TxError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => {
                Err(UserRepoError::EmailTaken)
            }
            Err(e) => Err(UserRepoError::Storage(e)),
        }
    }

    async fn confirm_email(&self, ctx: &TxContext, user_id: Uuid) -> Result<bool, UserRepoError> {
        let result = self
            .tx
            .executor(ctx)
            .execute(
                sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1").bind(user_id),
            )
            .await
            .map_err(UserRepoError::Storage)?;

        Ok(result.rows_affected() == 1)
    }
}
