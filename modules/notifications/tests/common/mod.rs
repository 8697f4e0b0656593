#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::middleware::{BoxError, DeadLetterSink};
use event_bus::{EventMeta, HandlerError, Message};
use notifications_rs::clock::Clock;
use notifications_rs::email_sender::{EmailError, EmailSender};
use notifications_rs::models::UserRegisteredEvent;
use notifications_rs::repos::{ProcessedEventStore, RepoError};
use platform_transaction::{Transactor, TxContext, TxError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Processed markers with staged writes: markers become visible to later
/// transactions only after [`StagingTx`] commits them.
#[derive(Default)]
pub struct MemoryProcessed {
    committed: Mutex<HashSet<Uuid>>,
    pending: Mutex<HashSet<Uuid>>,
    fail: AtomicBool,
}

impl MemoryProcessed {
    pub fn fail_with_storage_error(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.committed.lock().unwrap().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.committed.lock().unwrap().len()
    }

    fn commit(&self) {
        let pending: Vec<Uuid> = self.pending.lock().unwrap().drain().collect();
        self.committed.lock().unwrap().extend(pending);
    }

    fn rollback(&self) {
        self.pending.lock().unwrap().clear();
    }
}

#[async_trait]
impl ProcessedEventStore for MemoryProcessed {
    async fn mark_processed(&self, _ctx: &TxContext, event_id: Uuid) -> Result<bool, RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::from(TxError::Closed));
        }
        if self.committed.lock().unwrap().contains(&event_id) {
            return Ok(false);
        }
        Ok(self.pending.lock().unwrap().insert(event_id))
    }

    async fn delete_older_than(&self, _ctx: &TxContext, _retention: Duration) -> Result<u64, RepoError> {
        Ok(0)
    }
}

/// Commits or discards the staged markers of [`MemoryProcessed`].
#[derive(Clone)]
pub struct StagingTx {
    pub store: Arc<MemoryProcessed>,
}

impl Transactor for StagingTx {
    async fn wrap<T, E, F, Fut>(&self, ctx: &TxContext, work: F) -> Result<T, E>
    where
        T: Send,
        E: From<TxError> + Send,
        F: FnOnce(TxContext) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let result = work(ctx.clone()).await;
        match &result {
            Ok(_) => self.store.commit(),
            Err(_) => self.store.rollback(),
        }
        result
    }
}

/// Counts sends; fails while `failing` is set.
#[derive(Default)]
pub struct CountingSender {
    pub sent: AtomicU32,
    pub failing: AtomicBool,
    pub codes: Mutex<Vec<String>>,
}

impl CountingSender {
    pub fn count(&self) -> u32 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for CountingSender {
    async fn send(&self, event: &UserRegisteredEvent) -> Result<(), EmailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmailError::Delivery {
                to: event.email.clone(),
                reason: "smtp unavailable".to_string(),
            });
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().unwrap().push(event.code.clone());
        Ok(())
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub letters: Mutex<Vec<(i64, String, u32)>>,
}

#[async_trait]
impl DeadLetterSink for RecordingSink {
    async fn dead_letter(&self, msg: &Message, error: &HandlerError, attempts: u32) -> Result<(), BoxError> {
        self.letters
            .lock()
            .unwrap()
            .push((msg.offset, error.kind().to_string(), attempts));
        Ok(())
    }
}

pub fn event_at(created_at: DateTime<Utc>) -> UserRegisteredEvent {
    UserRegisteredEvent {
        meta: EventMeta::at(created_at),
        user_id: Uuid::new_v4(),
        email: "ada@example.com".to_string(),
        code: "314159".to_string(),
    }
}

pub fn message_for(event: &UserRegisteredEvent) -> Message {
    Message::new("user-registered", serde_json::to_vec(event).unwrap())
        .with_key(event.user_id.to_string().into_bytes())
}

pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
