use crate::batch::Batch;
use crate::batcher::{Batcher, BatcherCommand};
use crate::buffer::EventBuffer;
use crate::config::EmitterConfig;
use crate::delivery::{
    CollectorClient, DeliveryFailure, DeliveryWorker, FailureSink, PendingBatches,
};
use crate::error::EmitterError;
use crate::event::EventRecord;
use anyhow::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// Public entry point of the pipeline: buffers records, assembles batches in
/// the background, and ships them to the collector without ever blocking the
/// tracking caller on network I/O.
///
/// Lifecycle is `Running -> Draining -> Closed`. `track` only succeeds while
/// running; `flush` works until closed; `close` is terminal and idempotent.
pub struct Emitter {
    state: AtomicU8,
    config: Arc<EmitterConfig>,
    buffer: Arc<EventBuffer>,
    command_tx: mpsc::Sender<BatcherCommand>,
    queue: Arc<Mutex<mpsc::Receiver<Batch>>>,
    pending: Arc<PendingBatches>,
    failures: FailureSink,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Emitter {
    /// Start the emitter: spawns the batch-assembly task and the delivery
    /// workers. Must be called from within a tokio runtime.
    ///
    /// The returned receiver is the error-observation channel; every batch
    /// dropped for a terminal reason is published there exactly once.
    pub fn new(config: EmitterConfig) -> Result<(Emitter, UnboundedReceiver<DeliveryFailure>)> {
        config.validate()?;
        let config = Arc::new(config);

        let collector = Arc::new(CollectorClient::try_new(&config)?);
        let buffer = Arc::new(EventBuffer::new(config.buffer_capacity));
        let pending = Arc::new(PendingBatches::default());
        let shutdown = CancellationToken::new();

        let (command_tx, command_rx) = mpsc::channel(16);
        let (ready_tx, ready_rx) = mpsc::channel((config.delivery_parallelism * 2).max(2));
        let queue = Arc::new(Mutex::new(ready_rx));

        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let failures = FailureSink::new(failure_tx);

        let mut tasks = Vec::with_capacity(config.delivery_parallelism + 1);
        tasks.push(tokio::spawn(
            Batcher::new(
                config.clone(),
                buffer.clone(),
                command_rx,
                ready_tx,
                pending.clone(),
            )
            .run(),
        ));
        for worker_id in 0..config.delivery_parallelism {
            let worker = DeliveryWorker {
                worker_id,
                config: config.clone(),
                collector: collector.clone(),
                queue: queue.clone(),
                pending: pending.clone(),
                failures: failures.clone(),
                shutdown: shutdown.clone(),
            };
            tasks.push(tokio::spawn(worker.run()));
        }

        info!(
            endpoint = %config.endpoint,
            batch_size = config.batch_size,
            workers = config.delivery_parallelism,
            "emitter started"
        );

        let emitter = Emitter {
            state: AtomicU8::new(RUNNING),
            config,
            buffer,
            command_tx,
            queue,
            pending,
            failures,
            shutdown,
            tasks: Mutex::new(tasks),
        };
        Ok((emitter, failure_rx))
    }

    /// Submit a record for asynchronous delivery. Synchronous and lock-only;
    /// fails only on structural or capacity problems, never on anything
    /// happening downstream.
    pub fn track(&self, record: EventRecord) -> Result<(), EmitterError> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Err(EmitterError::Closed);
        }
        if record.schema.trim().is_empty() {
            return Err(EmitterError::InvalidEvent(
                "empty schema identifier".to_string(),
            ));
        }
        self.buffer.enqueue(record)
    }

    /// Close the current partial batch regardless of thresholds and wait
    /// until every batch queued so far reaches a terminal outcome, or until
    /// the timeout elapses.
    pub async fn flush(&self, timeout: Duration) -> Result<(), EmitterError> {
        if self.state.load(Ordering::SeqCst) == CLOSED {
            return Err(EmitterError::Closed);
        }
        let deadline = Instant::now() + timeout;

        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(BatcherCommand::Flush(ack_tx))
            .await
            .is_err()
        {
            return Err(EmitterError::Closed);
        }
        match tokio::time::timeout_at(deadline, ack_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(EmitterError::Closed),
            Err(_) => return Err(EmitterError::FlushTimeout),
        }

        tokio::time::timeout_at(deadline, self.pending.wait_drained())
            .await
            .map_err(|_| EmitterError::FlushTimeout)
    }

    /// Flush with an implicit shutdown. Batches still unfinished at the
    /// deadline are abandoned and published on the failure channel as
    /// `ShutdownAbandoned`; nothing is lost silently. Idempotent: a second
    /// call is an Ok no-op.
    pub async fn close(&self, timeout: Duration) -> Result<(), EmitterError> {
        match self
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) | Err(DRAINING) => {}
            Err(_) => return Ok(()),
        }
        let deadline = Instant::now() + timeout;

        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(BatcherCommand::Shutdown(ack_tx))
            .await
            .is_ok()
        {
            let _ = tokio::time::timeout_at(deadline, ack_rx).await;
        }

        let drained = tokio::time::timeout_at(deadline, self.pending.wait_drained())
            .await
            .is_ok();
        if !drained {
            warn!("close deadline expired, abandoning unfinished batches");
            self.shutdown.cancel();
        }

        // Anything still sitting in the ready queue was never owned by a
        // worker; account for it here.
        {
            let mut queue = self.queue.lock().await;
            queue.close();
            while let Ok(batch) = queue.try_recv() {
                self.failures.publish(DeliveryFailure::abandoned(&batch));
                self.pending.complete();
            }
        }

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("background task ended abnormally: {}", e);
                }
            }
        }

        self.state.store(CLOSED, Ordering::SeqCst);
        info!("emitter closed");
        Ok(())
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Records buffered but not yet pulled into a batch.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CLOSED
    }
}
