use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{FromRow, PgPool, Postgres};

use crate::context::TxScope;
use crate::TxError;

/// Where a repository statement runs: the ambient transaction or the pool.
///
/// Obtained from [`TxManager::executor`](crate::TxManager::executor).
pub struct Executor<'a> {
    target: Target<'a>,
}

enum Target<'a> {
    Pool(&'a PgPool),
    Tx(&'a TxScope),
}

impl<'a> Executor<'a> {
    pub(crate) fn pool(pool: &'a PgPool) -> Self {
        Self {
            target: Target::Pool(pool),
        }
    }

    pub(crate) fn tx(scope: &'a TxScope) -> Self {
        Self {
            target: Target::Tx(scope),
        }
    }
}

impl Executor<'_> {
    pub fn is_transaction(&self) -> bool {
        matches!(self.target, Target::Tx(_))
    }

    pub async fn execute<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<PgQueryResult, TxError> {
        match &self.target {
            Target::Pool(pool) => Ok(query.execute(*pool).await?),
            Target::Tx(scope) => {
                let mut guard = scope.conn.lock().await;
                let tx = guard.as_mut().ok_or(TxError::Closed)?;
                Ok(query.execute(&mut **tx).await?)
            }
        }
    }

    pub async fn fetch_all<'q, O>(
        &self,
        query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> Result<Vec<O>, TxError>
    where
        O: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        match &self.target {
            Target::Pool(pool) => Ok(query.fetch_all(*pool).await?),
            Target::Tx(scope) => {
                let mut guard = scope.conn.lock().await;
                let tx = guard.as_mut().ok_or(TxError::Closed)?;
                Ok(query.fetch_all(&mut **tx).await?)
            }
        }
    }

    pub async fn fetch_optional<'q, O>(
        &self,
        query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> Result<Option<O>, TxError>
    where
        O: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        match &self.target {
            Target::Pool(pool) => Ok(query.fetch_optional(*pool).await?),
            Target::Tx(scope) => {
                let mut guard = scope.conn.lock().await;
                let tx = guard.as_mut().ok_or(TxError::Closed)?;
                Ok(query.fetch_optional(&mut **tx).await?)
            }
        }
    }
}
