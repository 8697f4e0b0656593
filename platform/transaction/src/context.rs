use sqlx::{Postgres, Transaction};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handle to the transaction opened by one `wrap` call.
///
/// The connection is taken out when the owning `wrap` finishes, so clones of
/// the context that outlive it see [`TxError::Closed`](crate::TxError::Closed).
pub(crate) struct TxScope {
    pub(crate) conn: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl TxScope {
    pub(crate) fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            conn: Mutex::new(Some(tx)),
        }
    }

    pub(crate) async fn take(&self) -> Option<Transaction<'static, Postgres>> {
        self.conn.lock().await.take()
    }
}

/// Explicit carrier of the ambient transaction.
///
/// Cheap to clone; every clone refers to the same transaction.
#[derive(Clone, Default)]
pub struct TxContext {
    pub(crate) scope: Option<Arc<TxScope>>,
}

impl TxContext {
    /// Context with no ambient transaction; statements run on the pool.
    pub fn none() -> Self {
        Self::default()
    }

    pub(crate) fn with_scope(scope: Arc<TxScope>) -> Self {
        Self { scope: Some(scope) }
    }

    pub fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }
}

impl fmt::Debug for TxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxContext")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
