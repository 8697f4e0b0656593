//! Postgres-backed tests for TxManager.
//!
//! Run with a reachable database:
//! `DATABASE_URL=postgres://... cargo test -p platform-transaction -- --ignored`

use platform_transaction::{Transactor, TxContext, TxError, TxManager};
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Debug)]
enum TestError {
    Tx(TxError),
    Boom,
}

impl From<TxError> for TestError {
    fn from(e: TxError) -> Self {
        TestError::Tx(e)
    }
}

async fn setup() -> TxManager {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect");
    sqlx::query("CREATE TABLE IF NOT EXISTS tx_manager_scratch (id UUID PRIMARY KEY)")
        .execute(&pool)
        .await
        .expect("create scratch table");
    TxManager::new(pool)
}

async fn row_exists(tx: &TxManager, id: Uuid) -> bool {
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM tx_manager_scratch WHERE id = $1")
        .bind(id)
        .fetch_optional(tx.pool())
        .await
        .expect("scratch query");
    row.is_some()
}

async fn insert_row(tx: &TxManager, ctx: &TxContext, id: Uuid) -> Result<(), TxError> {
    tx.executor(ctx)
        .execute(sqlx::query("INSERT INTO tx_manager_scratch (id) VALUES ($1)").bind(id))
        .await?;
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_wrap_commits_on_ok() {
    let tx = setup().await;
    let id = Uuid::new_v4();

    let result: Result<(), TestError> = tx
        .wrap(&TxContext::none(), |ctx| {
            let tx = tx.clone();
            async move {
                assert!(tx.executor(&ctx).is_transaction());
                insert_row(&tx, &ctx, id).await?;
                Ok(())
            }
        })
        .await;

    assert!(result.is_ok());
    assert!(row_exists(&tx, id).await);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_wrap_rolls_back_on_err() {
    let tx = setup().await;
    let id = Uuid::new_v4();

    let result: Result<(), TestError> = tx
        .wrap(&TxContext::none(), |ctx| {
            let tx = tx.clone();
            async move {
                insert_row(&tx, &ctx, id).await?;
                Err(TestError::Boom)
            }
        })
        .await;

    assert!(matches!(result, Err(TestError::Boom)));
    assert!(!row_exists(&tx, id).await);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_nested_wrap_joins_outer_transaction() {
    let tx = setup().await;
    let outer_id = Uuid::new_v4();
    let inner_id = Uuid::new_v4();

    let result: Result<(), TestError> = tx
        .wrap(&TxContext::none(), |ctx| {
            let tx = tx.clone();
            async move {
                insert_row(&tx, &ctx, outer_id).await?;
                let inner: Result<(), TestError> = tx
                    .wrap(&ctx, |inner_ctx| {
                        let tx = tx.clone();
                        async move {
                            insert_row(&tx, &inner_ctx, inner_id).await?;
                            Ok(())
                        }
                    })
                    .await;
                inner?;
                Err(TestError::Boom)
            }
        })
        .await;

    assert!(result.is_err());
    assert!(!row_exists(&tx, outer_id).await);
    assert!(!row_exists(&tx, inner_id).await, "inner work must roll back with the outer wrap");
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_context_is_closed_after_wrap() {
    let tx = setup().await;

    let leaked: Result<TxContext, TestError> = tx
        .wrap(&TxContext::none(), |ctx| async move { Ok(ctx) })
        .await;
    let leaked = leaked.expect("wrap");

    let err = insert_row(&tx, &leaked, Uuid::new_v4())
        .await
        .expect_err("closed transaction must reject statements");
    assert!(matches!(err, TxError::Closed));
}
