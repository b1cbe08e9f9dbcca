use crate::batch::Batch;
use crate::config::EmitterConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of a single send attempt against the collector.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Success,
    Retryable(String),
    Terminal(TerminalReason),
}

/// Why a batch was dropped without being delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalReason {
    /// Collector rejected the payload with a non-retryable status.
    Rejected { status: u16, body: String },

    /// Retry budget exhausted on transient failures.
    RetryExhausted { attempts: u32, last_error: String },

    /// Still queued or in flight when the close deadline fired.
    ShutdownAbandoned,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Rejected { status, body } => {
                write!(f, "collector rejected batch with status {}: {}", status, body)
            }
            TerminalReason::RetryExhausted {
                attempts,
                last_error,
            } => write!(f, "retry budget exhausted after {} attempts: {}", attempts, last_error),
            TerminalReason::ShutdownAbandoned => write!(f, "abandoned at shutdown deadline"),
        }
    }
}

/// Published on the error-observation channel, exactly once per dropped batch.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub batch_id: Uuid,
    pub record_count: usize,
    pub reason: TerminalReason,
}

impl DeliveryFailure {
    pub(crate) fn abandoned(batch: &Batch) -> Self {
        DeliveryFailure {
            batch_id: batch.id,
            record_count: batch.len(),
            reason: TerminalReason::ShutdownAbandoned,
        }
    }
}

/// Sink for terminal failures: logs and forwards to the subscriber channel.
/// A dropped receiver only silences the channel, never the log stream.
#[derive(Clone)]
pub(crate) struct FailureSink {
    tx: UnboundedSender<DeliveryFailure>,
}

impl FailureSink {
    pub(crate) fn new(tx: UnboundedSender<DeliveryFailure>) -> Self {
        FailureSink { tx }
    }

    pub(crate) fn publish(&self, failure: DeliveryFailure) {
        error!(
            batch_id = %failure.batch_id,
            records = failure.record_count,
            reason = %failure.reason,
            "dropping undeliverable batch"
        );
        let _ = self.tx.send(failure);
    }
}

/// Count of batches handed to delivery that have not reached a terminal
/// outcome yet. `flush` waits on this reaching zero.
#[derive(Default)]
pub(crate) struct PendingBatches {
    count: AtomicUsize,
    drained: Notify,
}

impl PendingBatches {
    pub(crate) fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn complete(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.count.load(Ordering::SeqCst) == 0
    }

    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

/// HTTP client for the collector endpoint. One send attempt per call;
/// classification of the response drives the retry loop above it.
pub(crate) struct CollectorClient {
    client: Client,
    endpoint: String,
}

impl CollectorClient {
    pub(crate) fn try_new(config: &EmitterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build collector HTTP client")?;

        Ok(CollectorClient {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub(crate) async fn send(&self, batch: &Batch) -> DeliveryOutcome {
        let response = match self
            .client
            .post(&self.endpoint)
            .json(&batch.to_payload())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::Retryable(format!("network error: {}", e)),
        };

        let status = response.status();
        if status.is_success() {
            DeliveryOutcome::Success
        } else if status.is_server_error() {
            DeliveryOutcome::Retryable(format!("server error {}", status))
        } else {
            let body = response.text().await.unwrap_or_default();
            DeliveryOutcome::Terminal(TerminalReason::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Background worker pulling ready batches off the shared queue.
///
/// The receiver sits behind a mutex so that several workers can share it;
/// `recv` under the lock transfers exclusive ownership of the batch to the
/// worker that got it.
pub(crate) struct DeliveryWorker {
    pub(crate) worker_id: usize,
    pub(crate) config: Arc<EmitterConfig>,
    pub(crate) collector: Arc<CollectorClient>,
    pub(crate) queue: Arc<Mutex<Receiver<Batch>>>,
    pub(crate) pending: Arc<PendingBatches>,
    pub(crate) failures: FailureSink,
    pub(crate) shutdown: CancellationToken,
}

impl DeliveryWorker {
    pub(crate) async fn run(self) {
        loop {
            let batch = {
                let mut queue = self.queue.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    batch = queue.recv() => batch,
                }
            };

            // None: batcher exited and the queue is fully drained.
            let Some(batch) = batch else { break };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.failures.publish(DeliveryFailure::abandoned(&batch));
                }
                result = self.deliver_with_retry(&batch) => {
                    if let Err(reason) = result {
                        self.failures.publish(DeliveryFailure {
                            batch_id: batch.id,
                            record_count: batch.len(),
                            reason,
                        });
                    }
                }
            }

            self.pending.complete();
        }

        debug!(worker = self.worker_id, "delivery worker stopped");
    }

    async fn deliver_with_retry(&self, batch: &Batch) -> Result<(), TerminalReason> {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.collector.send(batch).await {
                DeliveryOutcome::Success => {
                    info!(
                        batch_id = %batch.id,
                        records = batch.len(),
                        attempt,
                        "batch accepted by collector"
                    );
                    return Ok(());
                }
                DeliveryOutcome::Terminal(reason) => return Err(reason),
                DeliveryOutcome::Retryable(err) => {
                    if attempt >= max_attempts {
                        return Err(TerminalReason::RetryExhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    let delay = self.config.backoff_delay(attempt - 1);
                    warn!(
                        batch_id = %batch.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient delivery failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
