//! Outbox and registration against a real Postgres.
//!
//! `DATABASE_URL=postgres://... cargo test -p auth-rs -- --ignored`

use async_trait::async_trait;
use auth_rs::db;
use auth_rs::models::OutboxEvent;
use auth_rs::password::PasswordPolicy;
use auth_rs::repos::{
    OutboxError, OutboxStore, PgOutboxRepository, PgUserRepository, PgVerificationRepository,
};
use auth_rs::services::{AuthError, RegistrationService};
use chrono::{Duration, Utc};
use platform_transaction::{Transactor, TxContext, TxManager};
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

async fn setup() -> TxManager {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&url).await.expect("connect");
    db::run_migrations(&pool).await.expect("migrate");
    sqlx::query("TRUNCATE outbox, verification_codes, users")
        .execute(&pool)
        .await
        .expect("truncate");
    TxManager::new(pool)
}

fn cheap_policy() -> PasswordPolicy {
    PasswordPolicy {
        memory_kb: 8,
        iterations: 1,
        parallelism: 1,
    }
}

fn row(age_secs: i64) -> OutboxEvent {
    OutboxEvent::new(
        Uuid::new_v4(),
        "user-registered",
        b"k".to_vec(),
        b"{}".to_vec(),
        Utc::now() - Duration::seconds(age_secs),
    )
}

async fn insert_committed(tx: &TxManager, repo: &PgOutboxRepository, event: &OutboxEvent) {
    tx.wrap(&TxContext::none(), |ctx| async move { repo.insert(&ctx, event).await })
        .await
        .expect("insert");
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_mark_sent_and_delete_sent() {
    let tx = setup().await;
    let repo = PgOutboxRepository::new(tx.clone());
    let first = row(10);
    let second = row(5);
    insert_committed(&tx, &repo, &first).await;
    insert_committed(&tx, &repo, &second).await;

    let ctx = TxContext::none();
    let unsent = repo.fetch_unsent(&ctx, 10).await.unwrap();
    assert_eq!(
        unsent.iter().map(|e| e.event_id).collect::<Vec<_>>(),
        vec![first.event_id, second.event_id]
    );

    repo.mark_sent(&ctx, first.event_id).await.unwrap();
    repo.mark_sent(&ctx, first.event_id).await.unwrap();
    let unsent = repo.fetch_unsent(&ctx, 10).await.unwrap();
    assert_eq!(unsent.len(), 1);
    assert_eq!(unsent[0].event_id, second.event_id);

    assert_eq!(repo.delete_sent(&ctx).await.unwrap(), 1);
    assert_eq!(repo.delete_sent(&ctx).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_claimed_rows_are_skipped_by_other_relays() {
    let tx = setup().await;
    let repo = PgOutboxRepository::new(tx.clone());
    let older = row(10);
    let newer = row(5);
    insert_committed(&tx, &repo, &older).await;
    insert_committed(&tx, &repo, &newer).await;

    let (claimed, seen_by_other) = tx
        .wrap(&TxContext::none(), |ctx| {
            let repo = &repo;
            let tx = &tx;
            async move {
                let claimed = repo.fetch_unsent(&ctx, 1).await?;
                // Separate transaction on another connection
                let other = tx
                    .wrap(&TxContext::none(), |other| async move {
                        repo.fetch_unsent(&other, 10).await
                    })
                    .await?;
                Ok::<_, OutboxError>((claimed, other))
            }
        })
        .await
        .unwrap();

    assert_eq!(claimed[0].event_id, older.event_id);
    assert_eq!(
        seen_by_other.iter().map(|e| e.event_id).collect::<Vec<_>>(),
        vec![newer.event_id]
    );
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_registration_commits_user_and_event_together() {
    let tx = setup().await;
    let outbox = Arc::new(PgOutboxRepository::new(tx.clone()));
    let service = RegistrationService::new(
        tx.clone(),
        Arc::new(PgUserRepository::new(tx.clone())),
        outbox.clone(),
        Arc::new(PgVerificationRepository::new(tx.clone())),
        "user-registered",
    )
    .with_password_policy(cheap_policy());

    let registered = service.register("grace@example.com", "hash").await.unwrap();
    let unsent = outbox.fetch_unsent(&TxContext::none(), 10).await.unwrap();
    assert_eq!(unsent.len(), 1);
    assert_eq!(unsent[0].event_id, registered.event_id);

    let err = service.register("grace@example.com", "hash").await.unwrap_err();
    assert!(matches!(err, AuthError::EmailAlreadyExists));
    assert_eq!(outbox.fetch_unsent(&TxContext::none(), 10).await.unwrap().len(), 1);
}

struct RejectingOutbox;

#[async_trait]
impl OutboxStore for RejectingOutbox {
    async fn insert(&self, _ctx: &TxContext, _event: &OutboxEvent) -> Result<(), OutboxError> {
        Err(OutboxError::NoTransaction)
    }

    async fn fetch_unsent(&self, _ctx: &TxContext, _limit: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        Ok(Vec::new())
    }

    async fn mark_sent(&self, _ctx: &TxContext, _event_id: Uuid) -> Result<(), OutboxError> {
        Ok(())
    }

    async fn delete_sent(&self, _ctx: &TxContext) -> Result<u64, OutboxError> {
        Ok(0)
    }
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_failed_outbox_insert_rolls_back_user() {
    let tx = setup().await;
    let service = RegistrationService::new(
        tx.clone(),
        Arc::new(PgUserRepository::new(tx.clone())),
        Arc::new(RejectingOutbox),
        Arc::new(PgVerificationRepository::new(tx.clone())),
        "user-registered",
    )
    .with_password_policy(cheap_policy());

    let err = service.register("linus@example.com", "hash").await.unwrap_err();
    assert!(matches!(err, AuthError::Outbox(_)));

    let users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind("linus@example.com")
        .fetch_one(tx.pool())
        .await
        .unwrap();
    assert_eq!(users.0, 0);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_verify_email_marks_user_verified() {
    let tx = setup().await;
    let outbox = Arc::new(PgOutboxRepository::new(tx.clone()));
    let service = RegistrationService::new(
        tx.clone(),
        Arc::new(PgUserRepository::new(tx.clone())),
        outbox.clone(),
        Arc::new(PgVerificationRepository::new(tx.clone())),
        "user-registered",
    )
    .with_password_policy(cheap_policy());

    let registered = service.register("barbara@example.com", "pw").await.unwrap();
    let (code,): (String,) = sqlx::query_as("SELECT code FROM verification_codes WHERE user_id = $1")
        .bind(registered.user_id)
        .fetch_one(tx.pool())
        .await
        .unwrap();

    service.verify_email(registered.user_id, &code).await.unwrap();

    let (verified,): (bool,) = sqlx::query_as("SELECT email_verified FROM users WHERE id = $1")
        .bind(registered.user_id)
        .fetch_one(tx.pool())
        .await
        .unwrap();
    assert!(verified);
    let err = service.verify_email(registered.user_id, &code).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidVerificationCode));
}
