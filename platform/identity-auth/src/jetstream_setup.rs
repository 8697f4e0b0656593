use event_bus::{BusResult, NatsBus};

use crate::config::Config;

/// Make sure the stream carrying outbox events exists before the relay starts.
pub async fn ensure_streams(bus: &NatsBus, cfg: &Config) -> BusResult<()> {
    bus.ensure_stream(&cfg.events_stream, vec![cfg.events_topic.clone()])
        .await
}
