//! # Ambient transactions
//!
//! Repositories in this workspace never take a `Transaction` argument. They take
//! a [`TxContext`] and ask the [`TxManager`] for an [`Executor`]: when the
//! context carries an open transaction the statement joins it, otherwise it
//! runs on the shared pool. That keeps the same repository method usable for a
//! standalone update (`mark_sent` from a broker ack) and for a write that must
//! commit together with a business mutation (`insert` of an outbox row).
//!
//! ```rust,no_run
//! use platform_transaction::{Transactor, TxContext, TxError, TxManager};
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), TxError> {
//! let tx = TxManager::new(pool);
//! tx.wrap(&TxContext::none(), |ctx| {
//!     let tx = tx.clone();
//!     async move {
//!         tx.executor(&ctx)
//!             .execute(sqlx::query("UPDATE outbox SET is_sent = TRUE"))
//!             .await?;
//!         Ok::<_, TxError>(())
//!     }
//! })
//! .await
//! # }
//! ```

mod context;
mod executor;
mod manager;

pub use context::TxContext;
pub use executor::Executor;
pub use manager::{Transactor, TxManager};

/// Errors raised by the transaction layer itself.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("transaction already closed")]
    Closed,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
