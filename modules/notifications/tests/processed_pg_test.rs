//! Processed-event repository and dead letters against a real Postgres.
//!
//! `DATABASE_URL=postgres://... cargo test -p notifications-rs -- --ignored`

use event_bus::middleware::DeadLetterSink;
use event_bus::{HandlerError, Message};
use notifications_rs::db;
use notifications_rs::dlq::PgDeadLetterSink;
use notifications_rs::repos::{
    PgFailedEventRepository, PgProcessedEventRepository, ProcessedEventStore, RepoError,
};
use platform_transaction::{Transactor, TxContext, TxManager};
use serial_test::serial;
use std::time::Duration;
use uuid::Uuid;

async fn setup() -> TxManager {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&url).await.expect("connect");
    db::run_migrations(&pool).await.expect("migrate");
    sqlx::query("TRUNCATE processed_events, failed_events")
        .execute(&pool)
        .await
        .expect("truncate");
    TxManager::new(pool)
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_mark_processed_reports_first_insert_only() {
    let tx = setup().await;
    let repo = PgProcessedEventRepository::new(tx);
    let id = Uuid::new_v4();
    let ctx = TxContext::none();

    assert!(repo.mark_processed(&ctx, id).await.unwrap());
    assert!(!repo.mark_processed(&ctx, id).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_rolled_back_marker_is_not_kept() {
    let tx = setup().await;
    let repo = PgProcessedEventRepository::new(tx.clone());
    let id = Uuid::new_v4();

    let result: Result<(), RepoError> = tx
        .wrap(&TxContext::none(), |ctx| {
            let repo = &repo;
            async move {
                assert!(repo.mark_processed(&ctx, id).await?);
                Err(RepoError::from(platform_transaction::TxError::Closed))
            }
        })
        .await;
    assert!(result.is_err());

    assert!(repo.mark_processed(&TxContext::none(), id).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_retention_deletes_only_old_markers() {
    let tx = setup().await;
    let repo = PgProcessedEventRepository::new(tx.clone());
    let old = Uuid::new_v4();
    let fresh = Uuid::new_v4();
    sqlx::query("INSERT INTO processed_events (event_id, processed_at) VALUES ($1, now() - interval '8 days')")
        .bind(old)
        .execute(tx.pool())
        .await
        .unwrap();
    let ctx = TxContext::none();
    repo.mark_processed(&ctx, fresh).await.unwrap();

    let deleted = repo
        .delete_older_than(&ctx, Duration::from_secs(7 * 24 * 60 * 60))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(repo.mark_processed(&ctx, old).await.unwrap());
    assert!(!repo.mark_processed(&ctx, fresh).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_dead_letter_row_carries_event_id() {
    let tx = setup().await;
    let failed = PgFailedEventRepository::new(tx.clone());
    let sink = PgDeadLetterSink::new(failed.clone());
    let id = Uuid::new_v4();
    let payload = serde_json::json!({ "event_id": id, "email": 42 });
    let msg = Message::new("user-registered", payload.to_string().into_bytes());

    sink.dead_letter(&msg, &HandlerError::Malformed("email: invalid type".into()), 3)
        .await
        .unwrap();

    assert_eq!(failed.count_for(&TxContext::none(), id).await.unwrap(), 1);
}
