//! User registration: the business write that the outbox announces.

use chrono::{Duration, Utc};
use event_bus::EventMeta;
use platform_transaction::{Transactor, TxContext, TxError};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{User, UserRegisteredEvent};
use crate::password::{hash_password, PasswordPolicy};
use crate::repos::{
    OutboxError, OutboxStore, UserRepoError, UserStore, VerificationError, VerificationStore,
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email")]
    InvalidEmail,

    #[error("password must not be empty")]
    InvalidPassword,

    #[error("email already registered")]
    EmailAlreadyExists,

    #[error("invalid verification code")]
    InvalidVerificationCode,

    #[error("user not found")]
    UserNotFound,

    #[error("hash password: {0}")]
    PasswordHash(String),

    #[error("encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    User(UserRepoError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Tx(#[from] TxError),
}

impl From<UserRepoError> for AuthError {
    fn from(e: UserRepoError) -> Self {
        match e {
            UserRepoError::EmailTaken => AuthError::EmailAlreadyExists,
            other => AuthError::User(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    pub user_id: Uuid,
    pub event_id: Uuid,
}

pub struct RegistrationService<T: Transactor> {
    tx: T,
    users: Arc<dyn UserStore>,
    outbox: Arc<dyn OutboxStore>,
    verifications: Arc<dyn VerificationStore>,
    topic: String,
    policy: PasswordPolicy,
    code_ttl: Duration,
}

impl<T: Transactor> RegistrationService<T> {
    pub fn new(
        tx: T,
        users: Arc<dyn UserStore>,
        outbox: Arc<dyn OutboxStore>,
        verifications: Arc<dyn VerificationStore>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            tx,
            users,
            outbox,
            verifications,
            topic: topic.into(),
            policy: PasswordPolicy::default(),
            code_ttl: Duration::minutes(15),
        }
    }

    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long a verification code stays valid after registration.
    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    /// Create the user, its verification code and its `UserRegistered`
    /// outbox row in one transaction.
    pub async fn register(&self, email: &str, password: &str) -> Result<Registered, AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidEmail);
        }
        if password.is_empty() {
            return Err(AuthError::InvalidPassword);
        }
        let hashed_password =
            hash_password(&self.policy, password).map_err(AuthError::PasswordHash)?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            hashed_password,
            created_at: now,
        };
        let event = UserRegisteredEvent {
            meta: EventMeta::at(now),
            user_id: user.id,
            email: user.email.clone(),
            code: verification_code(),
        };
        let row = event.to_outbox(&self.topic)?;
        let code = event.code.clone();
        let expires_at = now + self.code_ttl;

        let users = self.users.clone();
        let outbox = self.outbox.clone();
        let verifications = self.verifications.clone();
        let root = TxContext::none();
        let fut: Pin<Box<dyn Future<Output = Result<(), AuthError>> + Send + '_>> =
            Box::pin(self.tx.wrap(&root, move |ctx| async move {
                users.create(&ctx, &user).await?;
                verifications.save(&ctx, user.id, &code, expires_at).await?;
                outbox.insert(&ctx, &row).await?;
                Ok::<_, AuthError>(())
            }));
        fut.await?;

        tracing::info!(user_id = %event.user_id, event_id = %event.meta.event_id, "user registered");
        Ok(Registered {
            user_id: event.user_id,
            event_id: event.meta.event_id,
        })
    }

    /// Consume the pending code for `user_id` and mark its email verified.
    ///
    /// A wrong or expired code is rejected and leaves the user unverified.
    pub async fn verify_email(&self, user_id: Uuid, code: &str) -> Result<(), AuthError> {
        let users = self.users.clone();
        let verifications = self.verifications.clone();
        let code = code.trim().to_string();
        let now = Utc::now();

        self.tx
            .wrap(&TxContext::none(), move |ctx| async move {
                if !verifications.consume(&ctx, user_id, &code, now).await? {
                    return Err(AuthError::InvalidVerificationCode);
                }
                if !users.confirm_email(&ctx, user_id).await? {
                    return Err(AuthError::UserNotFound);
                }
                Ok(())
            })
            .await?;

        tracing::info!(user_id = %user_id, "email verified");
        Ok(())
    }
}

/// Six decimal digits, zero padded.
pub fn verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}
