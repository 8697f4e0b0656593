use auth_rs::config::{BusType, Config};
use auth_rs::events::mark_sent_on_ack;
use auth_rs::outbox::Relay;
use auth_rs::repos::{OutboxStore, PgOutboxRepository};
use auth_rs::{db, jetstream_setup};
use event_bus::{AsyncProducer, InMemoryBus, NatsBus, ProducerConfig, Transport};
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
        "starting identity-auth outbox relay"
    );

    // DB + migrations (fail-fast)
    let pool = db::init_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    let tx = TxManager::new(pool);
    let outbox: Arc<dyn OutboxStore> = Arc::new(PgOutboxRepository::new(tx.clone()));

    let transport: Arc<dyn Transport> = match cfg.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", cfg.nats_url);
            let bus = NatsBus::new(async_nats::connect(&cfg.nats_url).await?);
            jetstream_setup::ensure_streams(&bus, &cfg).await?;
            Arc::new(bus)
        }
    };

    let producer = Arc::new(AsyncProducer::start(
        transport,
        ProducerConfig {
            topic: cfg.events_topic.clone(),
            queue_capacity: cfg.producer_queue_capacity(),
            ..Default::default()
        },
        Some(mark_sent_on_ack(outbox.clone())),
    ));

    let relay = Relay::new(outbox, tx, producer.clone(), cfg.relay_config());
    let shutdown = CancellationToken::new();
    let relay_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { relay.run(shutdown).await })
    };

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    shutdown.cancel();
    relay_task.await?;

    // Flush queued sends so their acks still mark rows sent
    producer.close().await;
    tracing::info!("identity-auth stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,auth_rs=debug".into());
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
