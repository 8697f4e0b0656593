//! Outbox store kept in process memory, for tests and local runs.
//!
//! It has no notion of transactions or row locks: inserts are visible
//! immediately and `fetch_unsent` never skips rows.

use async_trait::async_trait;
use platform_transaction::TxContext;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::models::OutboxEvent;
use crate::repos::outbox_repo::{OutboxError, OutboxStore};

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    rows: Mutex<Vec<OutboxEvent>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<OutboxEvent> {
        self.rows().clone()
    }

    pub fn unsent_ids(&self) -> Vec<Uuid> {
        self.rows()
            .iter()
            .filter(|r| !r.is_sent)
            .map(|r| r.event_id)
            .collect()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<OutboxEvent>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxRepository {
    async fn insert(&self, _ctx: &TxContext, event: &OutboxEvent) -> Result<(), OutboxError> {
        self.rows().push(event.clone());
        Ok(())
    }

    async fn fetch_unsent(&self, _ctx: &TxContext, limit: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        let mut unsent: Vec<OutboxEvent> = self
            .rows()
            .iter()
            .filter(|r| !r.is_sent)
            .cloned()
            .collect();
        unsent.sort_by_key(|r| r.created_at);
        unsent.truncate(limit.max(0) as usize);
        Ok(unsent)
    }

    async fn mark_sent(&self, _ctx: &TxContext, event_id: Uuid) -> Result<(), OutboxError> {
        if let Some(row) = self.rows().iter_mut().find(|r| r.event_id == event_id) {
            row.is_sent = true;
        }
        Ok(())
    }

    async fn delete_sent(&self, _ctx: &TxContext) -> Result<u64, OutboxError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|r| !r.is_sent);
        Ok((before - rows.len()) as u64)
    }
}
