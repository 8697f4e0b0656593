//! Event metadata shared by every payload on the wire.
//!
//! Payloads are JSON objects carrying at least `event_id` and `created_at`;
//! event structs embed [`EventMeta`] with `#[serde(flatten)]`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Idempotency key, generated by the producing side
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(created_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at,
        }
    }

    /// True when the event is strictly older than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.created_at) > ttl
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort extraction of `event_id` for logs and dead letters.
pub fn peek_event_id(payload: &[u8]) -> Option<Uuid> {
    #[derive(Deserialize)]
    struct EventIdOnly {
        event_id: Uuid,
    }

    serde_json::from_slice::<EventIdOnly>(payload)
        .ok()
        .map(|p| p.event_id)
}
