use std::fmt;

/// Errors surfaced directly to the caller by the emitter API.
///
/// Delivery problems never appear here: they are recovered internally or
/// published on the failure channel, so `track` stays decoupled from the
/// network.
#[derive(Debug)]
pub enum EmitterError {
    /// The buffer is at capacity; the record was rejected, not queued.
    BufferFull { capacity: usize },

    /// The record failed structural validation at submission time.
    InvalidEvent(String),

    /// The emitter has been closed; no further calls are accepted.
    Closed,

    /// `flush` did not reach a fully-drained state before its deadline.
    FlushTimeout,
}

impl fmt::Display for EmitterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitterError::BufferFull { capacity } => {
                write!(f, "event buffer full (capacity {})", capacity)
            }
            EmitterError::InvalidEvent(reason) => write!(f, "invalid event: {}", reason),
            EmitterError::Closed => write!(f, "emitter is closed"),
            EmitterError::FlushTimeout => write!(f, "flush timed out before drain completed"),
        }
    }
}

impl std::error::Error for EmitterError {}
