use event_bus::middleware::DeadLetterSink;
use event_bus::{ConsumerGroup, InMemoryBus, NatsBus};
use notifications_rs::clock::SystemClock;
use notifications_rs::config::{BusType, Config};
use notifications_rs::consumer_tasks::{
    build_consumer, start_retention_sweep, start_user_registered_consumer,
};
use notifications_rs::db;
use notifications_rs::dlq::PgDeadLetterSink;
use notifications_rs::email_sender::LogEmailSender;
use notifications_rs::handlers::IdempotentEventHandler;
use notifications_rs::repos::{PgFailedEventRepository, PgProcessedEventRepository, ProcessedEventStore};
use platform_transaction::TxManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::from_env()?;
    tracing::info!(
        bus_type = ?cfg.bus_type,
        topic = %cfg.events_topic,
        group = %cfg.consumer_group,
        dlq_enabled = cfg.dlq_enabled,
        "starting notifications consumer"
    );

    let pool = db::init_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    let tx = TxManager::new(pool);
    let processed: Arc<dyn ProcessedEventStore> =
        Arc::new(PgProcessedEventRepository::new(tx.clone()));

    let group: Arc<dyn ConsumerGroup> = match cfg.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new().group(&cfg.consumer_group))
        }
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", cfg.nats_url);
            let bus = NatsBus::new(async_nats::connect(&cfg.nats_url).await?);
            bus.ensure_stream(&cfg.events_stream, vec![cfg.events_topic.clone()])
                .await?;
            Arc::new(bus.group(&cfg.events_stream, &cfg.consumer_group))
        }
    };

    let dead_letters = cfg.dlq_enabled.then(|| {
        Arc::new(PgDeadLetterSink::new(PgFailedEventRepository::new(tx.clone())))
            as Arc<dyn DeadLetterSink>
    });
    let consumer = build_consumer(
        group.clone(),
        vec![cfg.events_topic.clone()],
        cfg.max_retries,
        dead_letters,
    );
    let handler = IdempotentEventHandler::new(
        tx,
        processed.clone(),
        Arc::new(LogEmailSender),
        Arc::new(SystemClock),
        cfg.event_ttl,
    )
    .into_message_handler();

    let shutdown = CancellationToken::new();
    let consumer_task = start_user_registered_consumer(consumer, handler, shutdown.clone());
    let sweep_task = start_retention_sweep(
        processed,
        cfg.cleanup_interval,
        cfg.retention_period,
        shutdown.clone(),
    );

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    shutdown.cancel();
    if let Err(e) = group.close().await {
        tracing::warn!(error = %e, "failed to close consumer group");
    }
    consumer_task.await?;
    sweep_task.await?;

    tracing::info!("notifications stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
