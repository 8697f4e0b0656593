use std::env;
use std::str::FromStr;
use std::time::Duration;

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

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: BusType,
    pub nats_url: String,

    pub events_topic: String,
    pub events_stream: String,
    pub consumer_group: String,

    /// Events older than this are dropped unprocessed
    pub event_ttl: Duration,
    pub cleanup_interval: Duration,
    /// Processed markers older than this are swept
    pub retention_period: Duration,

    pub max_retries: u32,
    pub dlq_enabled: bool,
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
            consumer_group: env::var("CONSUMER_GROUP").unwrap_or_else(|_| "notifications".to_string()),

            event_ttl: Duration::from_secs(parse_or("EVENT_TTL_SECS", 15 * 60)?),
            cleanup_interval: Duration::from_secs(parse_or("CLEANUP_INTERVAL_SECS", 60 * 60)?),
            retention_period: Duration::from_secs(parse_or("RETENTION_PERIOD_SECS", 7 * 24 * 60 * 60)?),

            max_retries: parse_or("MAX_RETRIES", 3)?,
            dlq_enabled: parse_or("DLQ_ENABLED", false)?,
        };

        if cfg.max_retries == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_RETRIES",
                value: "0".to_string(),
            });
        }
        if cfg.cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "CLEANUP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        Ok(cfg)
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        env::remove_var("EVENT_TTL_SECS_TEST_ONLY");
        assert_eq!(parse_or("EVENT_TTL_SECS_TEST_ONLY", 900u64).unwrap(), 900);
    }

    #[test]
    #[serial]
    fn test_boolean_flag_parsing() {
        env::set_var("DLQ_ENABLED_TEST_ONLY", "true");
        assert!(parse_or("DLQ_ENABLED_TEST_ONLY", false).unwrap());

        env::set_var("DLQ_ENABLED_TEST_ONLY", "yes");
        let err = parse_or("DLQ_ENABLED_TEST_ONLY", false).unwrap_err();
        env::remove_var("DLQ_ENABLED_TEST_ONLY");

        assert!(matches!(err, ConfigError::Invalid { name: "DLQ_ENABLED_TEST_ONLY", .. }));
    }
}
