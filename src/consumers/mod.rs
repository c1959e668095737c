//! Durable event consumers
//!
//! Every consumer runs the same discipline: fetch a record, handle it with
//! bounded retries, and commit only after the handler succeeded. Poison
//! records (undecodable payloads) are logged and committed so they cannot
//! wedge a partition.

pub mod notification_consumer;
pub mod price_consumer;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::services::event_bus::{BusMessage, EventSubscriber};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &BusMessage) -> Result<()>;
}

/// Handler retries with linear backoff: `base * attempt`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * attempt
    }
}

enum Handled {
    Done,
    Poison,
    Interrupted,
}

async fn handle_with_retry<H: MessageHandler + ?Sized>(
    handler: &H,
    message: &BusMessage,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Handled> {
    let mut attempt = 0;
    loop {
        match handler.handle(message).await {
            Ok(()) => return Ok(Handled::Done),
            Err(PipelineError::Decode(reason)) => {
                error!(
                    consumer = handler.name(),
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key,
                    reason = %reason,
                    "Dropping undecodable record"
                );
                return Ok(Handled::Poison);
            }
            Err(e) if attempt < retry.max_retries => {
                attempt += 1;
                let wait = retry.backoff(attempt);
                warn!(
                    consumer = handler.name(),
                    key = %message.key,
                    offset = message.offset,
                    attempt = attempt,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Handler failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(Handled::Interrupted),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(e) => {
                return Err(PipelineError::Fatal(format!(
                    "{} gave up on {}/{}@{} (key {}) after {} retries: {}",
                    handler.name(),
                    message.topic,
                    message.partition,
                    message.offset,
                    message.key,
                    retry.max_retries,
                    e
                )));
            }
        }
    }
}

/// Fetch, handle, commit until cancelled. Returns `Fatal` when a record
/// exhausts its retries; the record stays uncommitted so a restarted
/// consumer picks it up again.
pub async fn run_consumer<S, H>(
    subscriber: &mut S,
    handler: &H,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: EventSubscriber + ?Sized,
    H: MessageHandler + ?Sized,
{
    info!(consumer = handler.name(), "Consumer started");
    loop {
        let message = match subscriber.fetch_message(cancel).await {
            Ok(message) => message,
            Err(PipelineError::Cancelled) => break,
            Err(e) if e.is_transient() => {
                warn!(consumer = handler.name(), error = %e, "Fetch failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry.base_backoff) => continue,
                }
            }
            Err(e) => return Err(e),
        };

        match handle_with_retry(handler, &message, retry, cancel).await? {
            Handled::Done | Handled::Poison => {
                subscriber.commit(&message).await.map_err(|e| {
                    PipelineError::Fatal(format!("{} commit failed: {}", handler.name(), e))
                })?;
                debug!(
                    consumer = handler.name(),
                    partition = message.partition,
                    offset = message.offset,
                    "Committed"
                );
            }
            Handled::Interrupted => break,
        }
    }
    info!(consumer = handler.name(), "Consumer stopped");
    Ok(())
}

/// Keeps a consumer alive: after a fatal exit it waits `restart_delay`
/// and resubscribes, resuming from the group's committed offsets.
pub fn supervise_consumer<F>(
    handler: Arc<dyn MessageHandler>,
    subscribe: F,
    retry: RetryPolicy,
    restart_delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    F: Fn() -> Box<dyn EventSubscriber> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            let mut subscriber = subscribe();
            match run_consumer(subscriber.as_mut(), handler.as_ref(), &retry, &cancel).await {
                Ok(()) => break,
                Err(e) => {
                    error!(consumer = handler.name(), error = %e, "Consumer exited");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(restart_delay) => {
                            info!(consumer = handler.name(), "Restarting consumer");
                        }
                    }
                }
            }
        }
    })
}
