use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Long-poll timeout cannot be 0")]
    InvalidLongPollTimeout,

    #[error("Scan interval cannot be 0")]
    InvalidScanInterval,

    #[error("Compaction queue size cannot be 0")]
    InvalidCompactionQueueSize,
}

/// Config service configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Listener for the query and notification endpoints
    pub listener: Listener,
    /// How long a watch is held open before resolving "unchanged"
    #[serde(default = "default_long_poll_timeout_secs")]
    pub long_poll_timeout_secs: u64,
    /// Interval at which this node tails the shared change-event log
    #[serde(default = "default_scan_interval_millis")]
    pub scan_interval_millis: u64,
    /// Capacity of the best-effort compaction hint queue
    #[serde(default = "default_compaction_queue_size")]
    pub compaction_queue_size: usize,
    /// Maximum entries in the merge engine's release cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_long_poll_timeout_secs() -> u64 {
    60
}

fn default_scan_interval_millis() -> u64 {
    1000
}

fn default_compaction_queue_size() -> usize {
    100
}

fn default_cache_capacity() -> u64 {
    4096
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if self.long_poll_timeout_secs == 0 {
            return Err(ValidationError::InvalidLongPollTimeout);
        }
        if self.scan_interval_millis == 0 {
            return Err(ValidationError::InvalidScanInterval);
        }
        if self.compaction_queue_size == 0 {
            return Err(ValidationError::InvalidCompactionQueueSize);
        }
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}
