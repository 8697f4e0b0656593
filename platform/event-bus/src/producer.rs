//! Non-blocking producer with broker-acknowledged success callbacks

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{BusError, BusResult, Message};

/// Resolves once the broker has acknowledged (or rejected) a dispatched message.
pub type AckFuture = BoxFuture<'static, BusResult<()>>;

/// Invoked with [`Message::metadata`] after the broker acknowledged the message.
pub type OnSuccess = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Broker-side publish primitive used by [`AsyncProducer`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand `msg` to the broker. The returned future resolves on broker ack.
    async fn dispatch(&self, msg: &Message) -> BusResult<AckFuture>;
}

/// Sending side of the broker boundary.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Enqueue `msg` for delivery. Returns once queued, not once acknowledged.
    async fn send(&self, msg: Message, cancel: &CancellationToken) -> BusResult<()>;
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Used for messages whose `topic` is empty
    pub topic: String,
    pub queue_capacity: usize,
    pub max_in_flight: usize,
}

impl ProducerConfig {
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            queue_capacity: 256,
            max_in_flight: 64,
        }
    }
}

/// Producer whose sends are acknowledged asynchronously.
///
/// Three tasks run for the producer's lifetime: a dispatcher that publishes
/// queued messages and awaits their acks, a success drain that invokes the
/// [`OnSuccess`] callback, and an error drain that logs delivery failures.
/// The tasks only talk to each other through channels.
pub struct AsyncProducer {
    input: mpsc::Sender<Message>,
    closing: CancellationToken,
    tasks: TaskTracker,
    default_topic: String,
}

impl AsyncProducer {
    /// Spawn the producer tasks on the current runtime.
    pub fn start(
        transport: Arc<dyn Transport>,
        config: ProducerConfig,
        on_success: Option<OnSuccess>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (input, input_rx) = mpsc::channel(capacity);
        // Drains may stall (a callback waiting on a row lock); the dispatcher
        // must keep pulling from the input queue regardless.
        let (success_tx, success_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(dispatch_loop(
            transport,
            input_rx,
            closing.clone(),
            success_tx,
            error_tx,
            config.max_in_flight.max(1),
        ));
        tasks.spawn(success_drain(success_rx, on_success));
        tasks.spawn(error_drain(error_rx));
        tasks.close();

        Self {
            input,
            closing,
            tasks,
            default_topic: config.topic,
        }
    }

    /// Stop intake, flush queued and in-flight messages, and wait for the
    /// dispatcher and both drains to exit.
    ///
    /// No callback fires after this returns. Calling it again is a no-op.
    pub async fn close(&self) {
        self.closing.cancel();
        self.tasks.wait().await;
        tracing::debug!("async producer closed");
    }
}

#[async_trait]
impl Producer for AsyncProducer {
    async fn send(&self, mut msg: Message, cancel: &CancellationToken) -> BusResult<()> {
        if self.closing.is_cancelled() {
            return Err(BusError::ProducerClosed);
        }
        if msg.topic.is_empty() {
            msg.topic = self.default_topic.clone();
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            sent = self.input.send(msg) => sent.map_err(|_| BusError::ProducerClosed),
        }
    }
}

async fn dispatch_loop(
    transport: Arc<dyn Transport>,
    mut input: mpsc::Receiver<Message>,
    closing: CancellationToken,
    successes: mpsc::UnboundedSender<Message>,
    errors: mpsc::UnboundedSender<(Message, BusError)>,
    max_in_flight: usize,
) {
    let mut in_flight = FuturesUnordered::new();
    let mut intake_open = true;
    let mut draining = false;

    loop {
        tokio::select! {
            _ = closing.cancelled(), if !draining => {
                // Buffered messages are still received before `recv` yields None.
                input.close();
                draining = true;
            }
            next = input.recv(), if intake_open && in_flight.len() < max_in_flight => match next {
                Some(msg) => match transport.dispatch(&msg).await {
                    Ok(ack) => in_flight.push(async move {
                        let acked = ack.await;
                        (msg, acked)
                    }),
                    Err(e) => {
                        let _ = errors.send((msg, e));
                    }
                },
                None => {
                    intake_open = false;
                    draining = true;
                }
            },
            Some((msg, acked)) = in_flight.next(), if !in_flight.is_empty() => match acked {
                Ok(()) => {
                    let _ = successes.send(msg);
                }
                Err(e) => {
                    let _ = errors.send((msg, e));
                }
            },
            else => break,
        }
    }
}

async fn success_drain(
    mut successes: mpsc::UnboundedReceiver<Message>,
    on_success: Option<OnSuccess>,
) {
    while let Some(msg) = successes.recv().await {
        if let (Some(callback), Some(metadata)) = (&on_success, msg.metadata) {
            callback(metadata).await;
        }
    }
}

async fn error_drain(mut errors: mpsc::UnboundedReceiver<(Message, BusError)>) {
    while let Some((msg, err)) = errors.recv().await {
        tracing::error!(
            topic = %msg.topic,
            metadata = ?msg.metadata,
            error = %err,
            "failed to deliver message"
        );
    }
}
