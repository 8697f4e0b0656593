use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::outbox::RelayConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    InMemory,
    Nats,
}

impl FromStr for BusType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" => Ok(BusType::InMemory),
            "nats" => Ok(BusType::Nats),
            _ => Err(()),
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: BusType,
    pub nats_url: String,

    pub events_topic: String,
    pub events_stream: String,

    // Outbox relay
    pub outbox_poll_interval: Duration,
    pub outbox_cleanup_interval: Duration,
    pub outbox_fetch_limit: i64,

    pub producer_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let cfg = Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            bus_type: parse_or("BUS_TYPE", BusType::Nats)?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),

            events_topic: env::var("EVENTS_TOPIC").unwrap_or_else(|_| "user-registered".to_string()),
            events_stream: env::var("EVENTS_STREAM").unwrap_or_else(|_| "AUTH_EVENTS".to_string()),

            outbox_poll_interval: Duration::from_millis(parse_or("OUTBOX_POLL_INTERVAL_MS", 2000)?),
            outbox_cleanup_interval: Duration::from_secs(parse_or(
                "OUTBOX_CLEANUP_INTERVAL_SECS",
                60,
            )?),
            outbox_fetch_limit: parse_or("OUTBOX_FETCH_LIMIT", 100)?,

            producer_queue_capacity: parse_or("PRODUCER_QUEUE_CAPACITY", 256)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox_fetch_limit <= 0 {
            return Err(ConfigError::Invalid {
                name: "OUTBOX_FETCH_LIMIT",
                value: self.outbox_fetch_limit.to_string(),
            });
        }
        if self.outbox_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "OUTBOX_POLL_INTERVAL_MS",
                value: "0".to_string(),
            });
        }
        if self.outbox_cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "OUTBOX_CLEANUP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: self.outbox_poll_interval,
            cleanup_interval: self.outbox_cleanup_interval,
            fetch_limit: self.outbox_fetch_limit,
        }
    }

    /// The relay keeps its claimed rows locked until the whole batch is
    /// queued, so the queue must hold at least one full batch.
    pub fn producer_queue_capacity(&self) -> usize {
        self.producer_queue_capacity
            .max(self.outbox_fetch_limit as usize)
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
