use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;

use crate::context::{TxContext, TxScope};
use crate::executor::Executor;
use crate::TxError;

/// Runs a unit of work inside a transaction.
///
/// `work` receives a context carrying the transaction. The transaction
/// commits when `work` returns `Ok` and rolls back when it returns `Err`.
/// When `ctx` already carries a transaction, `work` joins it: no new
/// transaction is opened and nothing is committed until the outermost
/// `wrap` finishes.
pub trait Transactor: Send + Sync {
    fn wrap<T, E, F, Fut>(
        &self,
        ctx: &TxContext,
        work: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<TxError> + Send,
        F: FnOnce(TxContext) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send;
}

/// Postgres-backed [`Transactor`] that also hands out executors.
#[derive(Clone)]
pub struct TxManager {
    pool: PgPool,
}

impl TxManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Executor for `ctx`: its transaction if it has one, else the pool.
    pub fn executor<'a>(&'a self, ctx: &'a TxContext) -> Executor<'a> {
        match &ctx.scope {
            Some(scope) => Executor::tx(scope),
            None => Executor::pool(&self.pool),
        }
    }
}

impl Transactor for TxManager {
    async fn wrap<T, E, F, Fut>(&self, ctx: &TxContext, work: F) -> Result<T, E>
    where
        T: Send,
        E: From<TxError> + Send,
        F: FnOnce(TxContext) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if ctx.in_transaction() {
            return work(ctx.clone()).await;
        }

        let tx = self.pool.begin().await.map_err(TxError::Begin)?;
        let scope = Arc::new(TxScope::new(tx));
        let result = work(TxContext::with_scope(scope.clone())).await;
        let tx = scope.take().await;

        match result {
            Ok(value) => {
                let tx = tx.ok_or(TxError::Closed)?;
                tx.commit().await.map_err(TxError::Commit)?;
                Ok(value)
            }
            Err(err) => {
                if let Some(tx) = tx {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::error!(error = %rollback_err, "transaction rollback failed");
                    }
                }
                Err(err)
            }
        }
    }
}
