//! Verification email delivery.

use async_trait::async_trait;

use crate::models::UserRegisteredEvent;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email delivery to {to} failed: {reason}")]
    Delivery { to: String, reason: String },
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, event: &UserRegisteredEvent) -> Result<(), EmailError>;
}

/// Writes the email to the log instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, event: &UserRegisteredEvent) -> Result<(), EmailError> {
        tracing::info!(
            event_id = %event.meta.event_id,
            user_id = %event.user_id,
            email = %event.email,
            code = %event.code,
            "verification email sent"
        );
        Ok(())
    }
}
