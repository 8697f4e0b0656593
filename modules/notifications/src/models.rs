use event_bus::EventMeta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound `user-registered` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub user_id: Uuid,
    pub email: String,
    pub code: String,
}
