//! Correlates broker acknowledgements back to outbox rows.

use event_bus::OnSuccess;
use futures::FutureExt;
use platform_transaction::TxContext;
use std::sync::Arc;
use uuid::Uuid;

use crate::repos::OutboxStore;

/// Producer callback that marks the acknowledged event sent.
///
/// The relay sets each message's metadata to its outbox `event_id`.
/// Failures are logged; the row then stays unsent and is relayed again.
pub fn mark_sent_on_ack(store: Arc<dyn OutboxStore>) -> OnSuccess {
    Arc::new(move |metadata: String| {
        let store = store.clone();
        async move {
            let event_id = match Uuid::parse_str(&metadata) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(metadata = %metadata, error = %e, "ack metadata is not an event id");
                    return;
                }
            };
            if let Err(e) = store.mark_sent(&TxContext::none(), event_id).await {
                tracing::error!(event_id = %event_id, error = %e, "failed to mark outbox event sent");
            }
        }
        .boxed()
    })
}
