use chrono::{DateTime, Utc};
use event_bus::EventMeta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}

/// Intent to publish, committed together with the mutation it announces.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub is_sent: bool,
}

impl OutboxEvent {
    pub fn new(
        event_id: Uuid,
        topic: impl Into<String>,
        key: Vec<u8>,
        value: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            topic: topic.into(),
            key,
            value,
            created_at,
            is_sent: false,
        }
    }
}

/// Published when a user registers; the notification service emails `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub user_id: Uuid,
    pub email: String,
    pub code: String,
}

impl UserRegisteredEvent {
    /// Outbox row for this event, keyed by user so a user's events stay ordered.
    pub fn to_outbox(&self, topic: &str) -> Result<OutboxEvent, serde_json::Error> {
        Ok(OutboxEvent::new(
            self.meta.event_id,
            topic,
            self.user_id.to_string().into_bytes(),
            serde_json::to_vec(self)?,
            self.meta.created_at,
        ))
    }
}
