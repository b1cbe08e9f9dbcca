use crate::batch::Batch;
use crate::buffer::EventBuffer;
use crate::config::EmitterConfig;
use crate::delivery::PendingBatches;
use crate::event::EventRecord;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

pub(crate) enum BatcherCommand {
    /// Close the partial batch, drain the buffer completely, then ack.
    Flush(oneshot::Sender<()>),
    /// Flush, ack, and exit; dropping the ready-queue sender lets the
    /// delivery workers drain what is left and stop.
    Shutdown(oneshot::Sender<()>),
}

/// Background task turning the record stream into batches.
///
/// A batch closes on whichever trigger fires first: the size trigger is
/// checked after every refill so a batch never exceeds `batch_size`; the
/// time trigger runs from the moment the first record entered the open
/// batch.
pub(crate) struct Batcher {
    config: Arc<EmitterConfig>,
    buffer: Arc<EventBuffer>,
    commands: mpsc::Receiver<BatcherCommand>,
    ready_tx: mpsc::Sender<Batch>,
    pending: Arc<PendingBatches>,
    open: Vec<EventRecord>,
    deadline: Option<Instant>,
}

impl Batcher {
    pub(crate) fn new(
        config: Arc<EmitterConfig>,
        buffer: Arc<EventBuffer>,
        commands: mpsc::Receiver<BatcherCommand>,
        ready_tx: mpsc::Sender<Batch>,
        pending: Arc<PendingBatches>,
    ) -> Self {
        Batcher {
            config,
            buffer,
            commands,
            ready_tx,
            pending,
            open: Vec::new(),
            deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            self.fill_open_batch();

            if self.open.len() >= self.config.batch_size {
                self.close_open_batch().await;
                continue;
            }

            let deadline = self.deadline;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BatcherCommand::Flush(ack)) => {
                        self.flush_all().await;
                        let _ = ack.send(());
                    }
                    Some(BatcherCommand::Shutdown(ack)) => {
                        self.flush_all().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.flush_all().await;
                        break;
                    }
                },
                _ = self.buffer.wait_for_records() => {}
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.close_open_batch().await;
                }
            }
        }

        debug!("batcher stopped");
    }

    /// Move buffered records into the open batch, up to the size limit.
    fn fill_open_batch(&mut self) {
        let room = self.config.batch_size.saturating_sub(self.open.len());
        if room == 0 {
            return;
        }

        let drained = self.buffer.drain(room);
        if drained.is_empty() {
            return;
        }

        if self.open.is_empty() {
            self.deadline = Some(Instant::now() + self.config.batch_timeout());
        }
        self.open.extend(drained);
    }

    async fn close_open_batch(&mut self) {
        self.deadline = None;
        if self.open.is_empty() {
            return;
        }

        let batch = Batch::new(std::mem::take(&mut self.open));
        debug!(batch_id = %batch.id, records = batch.len(), "batch closed");

        self.pending.add();
        if self.ready_tx.send(batch).await.is_err() {
            // Workers are gone; only reachable in shutdown races.
            warn!("ready-batch queue closed, dropping batch");
            self.pending.complete();
        }
    }

    /// Drain everything buffered so far into batches, closing the partial
    /// batch last even if under both thresholds.
    async fn flush_all(&mut self) {
        loop {
            self.fill_open_batch();
            if self.open.is_empty() {
                return;
            }
            self.close_open_batch().await;
        }
    }
}
