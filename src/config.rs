use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Emitter configuration. Passed explicitly at construction; there is no
/// process-wide state.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmitterConfig {
    /// Collector endpoint the batches are POSTed to.
    pub endpoint: String,

    /// Records per batch before the size trigger closes it.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Time trigger: a batch closes this long after its first record arrived,
    /// even if under size.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Capacity of the submission buffer; `track` rejects once it is full.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Number of concurrent delivery workers.
    #[serde(default = "default_delivery_parallelism")]
    pub delivery_parallelism: usize,

    /// Retries per batch after the first attempt; 0 means one attempt total.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-request timeout for the HTTP send.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    5_000
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_delivery_parallelism() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl EmitterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        EmitterConfig {
            endpoint: endpoint.into(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            buffer_capacity: default_buffer_capacity(),
            delivery_parallelism: default_delivery_parallelism(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            bail!("collector endpoint must not be empty");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.batch_timeout_ms == 0 {
            bail!("batch_timeout_ms must be positive");
        }
        if self.buffer_capacity == 0 {
            bail!("buffer_capacity must be positive");
        }
        if self.delivery_parallelism == 0 {
            bail!("delivery_parallelism must be positive");
        }
        if self.base_backoff_ms == 0 {
            bail!("base_backoff_ms must be positive");
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Exponential backoff for the given retry attempt (0-based), capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.max_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EmitterConfig::new("http://localhost:9090/events");
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_rejects_zero_fields() {
        let mut config = EmitterConfig::new("http://localhost:9090/events");
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EmitterConfig::new("http://localhost:9090/events");
        config.delivery_parallelism = 0;
        assert!(config.validate().is_err());

        let config = EmitterConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut config = EmitterConfig::new("http://localhost:9090/events");
        config.base_backoff_ms = 100;
        config.max_backoff_ms = 350;

        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(350));
        assert_eq!(config.backoff_delay(63), Duration::from_millis(350));
    }
}
