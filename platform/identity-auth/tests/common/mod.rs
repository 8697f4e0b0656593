#![allow(dead_code)]

use async_trait::async_trait;
use auth_rs::models::User;
use auth_rs::password::PasswordPolicy;
use auth_rs::repos::{UserRepoError, UserStore, VerificationError, VerificationStore};
use event_bus::{BusError, BusResult, Message, Producer};
use platform_transaction::{Transactor, TxContext, TxError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Runs the work with the caller's context; no database involved.
#[derive(Clone, Default)]
pub struct PassThroughTx;

impl Transactor for PassThroughTx {
    async fn wrap<T, E, F, Fut>(&self, ctx: &TxContext, work: F) -> Result<T, E>
    where
        T: Send,
        E: From<TxError> + Send,
        F: FnOnce(TxContext) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        work(ctx.clone()).await
    }
}

/// Records sends; the send numbered `fail_at` (1-based) fails.
#[derive(Default)]
pub struct RecordingProducer {
    pub sent: Mutex<Vec<Message>>,
    fail_at: Option<usize>,
    attempts: Mutex<usize>,
}

impl RecordingProducer {
    pub fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Default::default()
        }
    }

    pub fn metadata(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.metadata.clone())
            .collect()
    }
}

#[async_trait]
impl Producer for RecordingProducer {
    async fn send(&self, msg: Message, _cancel: &CancellationToken) -> BusResult<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.fail_at == Some(attempt) {
            return Err(BusError::PublishError("broker unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

/// User store enforcing unique emails in memory.
#[derive(Default)]
pub struct MemoryUsers {
    pub emails: Mutex<HashSet<String>>,
    pub users: Mutex<Vec<User>>,
    pub verified: Mutex<HashSet<Uuid>>,
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn create(&self, _ctx: &TxContext, user: &User) -> Result<(), UserRepoError> {
        if !self.emails.lock().unwrap().insert(user.email.clone()) {
            return Err(UserRepoError::EmailTaken);
        }
        self.users.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn confirm_email(&self, _ctx: &TxContext, user_id: Uuid) -> Result<bool, UserRepoError> {
        if !self.users.lock().unwrap().iter().any(|u| u.id == user_id) {
            return Ok(false);
        }
        self.verified.lock().unwrap().insert(user_id);
        Ok(true)
    }
}

/// Pending verification codes keyed by user.
#[derive(Default)]
pub struct MemoryVerifications {
    pub codes: Mutex<HashMap<Uuid, (String, DateTime<Utc>)>>,
}

#[async_trait]
impl VerificationStore for MemoryVerifications {
    async fn save(
        &self,
        _ctx: &TxContext,
        user_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        self.codes
            .lock()
            .unwrap()
            .insert(user_id, (code.to_string(), expires_at));
        Ok(())
    }

    async fn consume(
        &self,
        _ctx: &TxContext,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, VerificationError> {
        let mut codes = self.codes.lock().unwrap();
        match codes.get(&user_id) {
            Some((stored, expires_at)) if stored == code && *expires_at > now => {
                codes.remove(&user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Argon2 parameters cheap enough for tests.
pub fn cheap_policy() -> PasswordPolicy {
    PasswordPolicy {
        memory_kb: 8,
        iterations: 1,
        parallelism: 1,
    }
}
