//! NATS JetStream broker

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::consumer::{Acker, ConsumerGroup, Delivery};
use crate::producer::{AckFuture, Transport};
use crate::{BusError, BusResult, Message};

/// Header carrying [`Message::key`], base64 encoded; JetStream has no
/// native message key.
pub const KEY_HEADER: &str = "Message-Key";

/// Broker implementation using NATS JetStream
///
/// Publishing goes through JetStream so every message gets a broker ack;
/// the ack future is what [`AsyncProducer`](crate::AsyncProducer) waits on.
///
/// # Example
/// ```rust,no_run
/// use event_bus::NatsBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
/// bus.ensure_stream("AUTH_EVENTS", vec!["user-registered".to_string()]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Create stream `name` over `subjects` unless it already exists.
    pub async fn ensure_stream(&self, name: &str, subjects: Vec<String>) -> BusResult<()> {
        if self.jetstream.get_stream(name).await.is_ok() {
            return Ok(());
        }

        let config = stream::Config {
            name: name.to_string(),
            subjects,
            max_age: Duration::from_secs(60 * 60 * 24 * 14), // 14 days
            ..Default::default()
        };
        self.jetstream
            .create_stream(config)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        tracing::info!(stream = %name, "created JetStream stream");
        Ok(())
    }

    /// A member of the durable consumer `durable` on stream `stream`.
    pub fn group(&self, stream: &str, durable: &str) -> NatsGroup {
        NatsGroup {
            jetstream: self.jetstream.clone(),
            stream: stream.to_string(),
            durable: durable.to_string(),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for NatsBus {
    async fn dispatch(&self, msg: &Message) -> BusResult<AckFuture> {
        let mut headers = HeaderMap::new();
        for (name, value) in &msg.headers {
            headers.insert(name.as_str(), header_value(name, value)?);
        }
        if !msg.key.is_empty() {
            headers.insert(KEY_HEADER, encode_key(&msg.key).as_str());
        }

        let ack = self
            .jetstream
            .publish_with_headers(msg.topic.clone(), headers, msg.value.clone().into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(Box::pin(async move {
            ack.await
                .map(|_| ())
                .map_err(|e| BusError::PublishError(e.to_string()))
        }))
    }
}

/// NATS header values are text; anything else is refused rather than mangled.
fn header_value<'a>(name: &str, value: &'a [u8]) -> BusResult<&'a str> {
    std::str::from_utf8(value)
        .map_err(|_| BusError::PublishError(format!("header {name} is not valid UTF-8")))
}

fn encode_key(key: &[u8]) -> String {
    STANDARD.encode(key)
}

fn decode_key(header: &[u8]) -> Vec<u8> {
    match STANDARD.decode(header) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, "message key header is not base64, using it verbatim");
            header.to_vec()
        }
    }
}

/// Durable pull consumer with explicit acks.
///
/// All members sharing `durable` split the stream's messages between them.
/// JetStream streams are not partitioned: every delivery reports partition 0
/// and its stream sequence as the offset.
pub struct NatsGroup {
    jetstream: jetstream::Context,
    stream: String,
    durable: String,
    closed: CancellationToken,
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}

#[async_trait]
impl ConsumerGroup for NatsGroup {
    async fn join(&self, topics: &[String]) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        if self.closed.is_cancelled() {
            return Err(BusError::GroupClosed);
        }

        let stream = self
            .jetstream
            .get_stream(&self.stream)
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;
        let consumer = stream
            .get_or_create_consumer(
                &self.durable,
                pull::Config {
                    durable_name: Some(self.durable.clone()),
                    filter_subjects: topics.to_vec(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let closed = self.closed.clone();
        let deliveries = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => None,
                    next = messages.next() => Some(next),
                };
                match next {
                    None => {
                        yield Err(BusError::GroupClosed);
                        break;
                    }
                    Some(None) => break,
                    Some(Some(Err(e))) => {
                        yield Err(BusError::SubscribeError(e.to_string()));
                        break;
                    }
                    Some(Some(Ok(message))) => yield Ok(to_delivery(message)),
                }
            }
        };

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        self.closed.cancel();
        Ok(())
    }
}

fn to_delivery(message: jetstream::Message) -> Delivery {
    let mut headers = HashMap::new();
    if let Some(nats_headers) = &message.message.headers {
        for (name, values) in nats_headers.iter() {
            // Repeated headers collapse to the last value
            if let Some(value) = values.last() {
                headers.insert(name.to_string(), value.to_string().into_bytes());
            }
        }
    }
    let key = headers
        .remove(KEY_HEADER)
        .map(|header| decode_key(&header))
        .unwrap_or_default();

    let (offset, timestamp) = match message.info() {
        Ok(info) => (
            info.stream_sequence as i64,
            DateTime::<Utc>::from_timestamp(info.published.unix_timestamp(), info.published.nanosecond()),
        ),
        Err(_) => (0, None),
    };

    let msg = Message {
        key,
        value: message.message.payload.to_vec(),
        headers,
        topic: message.message.subject.to_string(),
        partition: 0,
        offset,
        timestamp,
        metadata: None,
    };
    Delivery::new(msg, Box::new(NatsAcker { message }))
}
