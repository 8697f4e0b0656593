//! Handler middleware for consumers
//!
//! A [`MessageHandler`] is wrapped by an ordered list of [`Middleware`]s once,
//! when the consumer starts. The list is outer to inner. Services use
//!
//! ```text
//! recovery() -> logging() -> with_retry(n) -> business handler
//! ```
//!
//! Recovery must stay outermost so a panic anywhere below it becomes a
//! [`HandlerError::Panic`] instead of taking down the consumer task.
//!
//! Retry has no backoff. After `n` failed attempts the message is given up:
//! it is logged and reported as handled so the partition keeps moving, or,
//! with [`with_retry_and_dead_letter`], handed to a [`DeadLetterSink`] first.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::envelope::peek_event_id;
use crate::Message;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// Business handler as seen by the consumer loop.
pub type MessageHandler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Wraps a handler in another handler.
pub type Middleware = Arc<dyn Fn(MessageHandler) -> MessageHandler + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A panic caught by [`recovery`]
    #[error("handler panicked: {0}")]
    Panic(String),

    /// The message can never be processed as-is (bad payload or identifier)
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Failed(BoxError),
}

impl HandlerError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        HandlerError::Failed(err.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Panic(_) => "panic",
            HandlerError::Malformed(_) => "malformed",
            HandlerError::Failed(_) => "failed",
        }
    }
}

/// Destination for messages that exhausted their retries.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(
        &self,
        msg: &Message,
        error: &HandlerError,
        attempts: u32,
    ) -> Result<(), BoxError>;
}

/// Build a [`MessageHandler`] from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |msg| f(msg).boxed())
}

/// Apply `middlewares` (outer to inner) around `handler`.
pub fn chain(middlewares: &[Middleware], handler: MessageHandler) -> MessageHandler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |inner, middleware| middleware(inner))
}

/// Convert panics in inner handlers into [`HandlerError::Panic`].
pub fn recovery() -> Middleware {
    Arc::new(|next: MessageHandler| -> MessageHandler {
        Arc::new(move |msg: Message| {
            let next = next.clone();
            let (topic, partition, offset) = (msg.topic.clone(), msg.partition, msg.offset);
            async move {
                // The call itself runs inside the guarded future so a panic
                // while building the inner future is caught too.
                match AssertUnwindSafe(async move { next(msg).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!(
                            topic = %topic,
                            partition,
                            offset,
                            panic = %reason,
                            "recovered from panic in message handler"
                        );
                        Err(HandlerError::Panic(reason))
                    }
                }
            }
            .boxed()
        })
    })
}

/// Log outcome and timing of each invocation.
pub fn logging() -> Middleware {
    Arc::new(|next: MessageHandler| -> MessageHandler {
        Arc::new(move |msg: Message| {
            let next = next.clone();
            let (topic, partition, offset) = (msg.topic.clone(), msg.partition, msg.offset);
            let event_id = peek_event_id(&msg.value);
            async move {
                let started = Instant::now();
                let result = next(msg).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(()) => debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_id = ?event_id,
                        elapsed_ms,
                        "message handled"
                    ),
                    Err(e) => debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_id = ?event_id,
                        elapsed_ms,
                        error = %e,
                        "message handler failed"
                    ),
                }
                result
            }
            .boxed()
        })
    })
}

/// Retry the inner handler up to `max_attempts` times, then drop the message.
pub fn with_retry(max_attempts: u32) -> Middleware {
    retry(max_attempts, None)
}

/// Like [`with_retry`], but exhausted messages go to `sink`.
///
/// If the sink itself fails, that error is returned and the message stays
/// uncommitted.
pub fn with_retry_and_dead_letter(max_attempts: u32, sink: Arc<dyn DeadLetterSink>) -> Middleware {
    retry(max_attempts, Some(sink))
}

fn retry(max_attempts: u32, sink: Option<Arc<dyn DeadLetterSink>>) -> Middleware {
    let max_attempts = max_attempts.max(1);
    Arc::new(move |next: MessageHandler| -> MessageHandler {
        let sink = sink.clone();
        Arc::new(move |msg: Message| {
            let next = next.clone();
            let sink = sink.clone();
            async move {
                let mut attempt = 0;
                let last_err = loop {
                    attempt += 1;
                    match next(msg.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(e) if attempt >= max_attempts => break e,
                        Err(e) => warn!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            attempt,
                            max_attempts,
                            kind = e.kind(),
                            error = %e,
                            "message handler failed, retrying"
                        ),
                    }
                };

                match sink {
                    Some(sink) => {
                        sink.dead_letter(&msg, &last_err, attempt)
                            .await
                            .map_err(HandlerError::Failed)?;
                        error!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            attempts = attempt,
                            kind = last_err.kind(),
                            error = %last_err,
                            "message dead-lettered after max retries"
                        );
                    }
                    None => error!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        attempts = attempt,
                        kind = last_err.kind(),
                        error = %last_err,
                        "message dropped after max retries"
                    ),
                }
                Ok(())
            }
            .boxed()
        })
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
