//! Buffering, batching analytics-event emitter.
//!
//! Application code builds immutable [`EventRecord`] values and hands them to
//! an [`Emitter`], which buffers them, assembles batches on size or time
//! triggers, and ships them to an HTTP collector from background workers with
//! retry on transient failures. Undeliverable batches surface on the
//! error-observation channel returned by [`Emitter::new`].
//!
//! ```rust,no_run
//! # use anyhow::Result;
//! # use std::time::Duration;
//! # use trackline::{Emitter, EmitterConfig, EventRecord};
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let config = EmitterConfig::new("https://collector.example.com/events");
//! let (emitter, mut failures) = Emitter::new(config)?;
//!
//! emitter.track(EventRecord::self_describing(
//!     "iglu:io.snowplow.foundation/conversion/jsonschema/1-0-0",
//!     serde_json::json!({ "name": "email-signup", "value": "10" }),
//! ))?;
//!
//! emitter.close(Duration::from_secs(5)).await?;
//! while let Ok(failure) = failures.try_recv() {
//!     eprintln!("dropped batch {}: {}", failure.batch_id, failure.reason);
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod batcher;
mod buffer;
mod config;
mod delivery;
mod emitter;
mod error;
mod event;

pub use batch::{Batch, BatchPayload, PAYLOAD_DATA_SCHEMA};
pub use config::EmitterConfig;
pub use delivery::{DeliveryFailure, DeliveryOutcome, TerminalReason};
pub use emitter::Emitter;
pub use error::EmitterError;
pub use event::{EventRecord, SelfDescribingJson, Subject};
