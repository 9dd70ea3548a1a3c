use async_trait::async_trait;
use std::time::Duration;

use crate::domain::config::TimingConfig;

/// Source of the waits used by the device exchange
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Intervals of one command/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTiming {
    /// Device processing time between the write and the first read
    pub settle: Duration,
    /// Pause before the second read of an empty line slot
    pub grace: Duration,
    /// Pause between failed attempts
    pub backoff: Duration,
    /// Upper bound on a single line read
    pub read_timeout: Duration,
}

impl Default for DeviceTiming {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for DeviceTiming {
    fn from(config: &TimingConfig) -> Self {
        Self {
            settle: Duration::from_millis(config.settle_ms),
            grace: Duration::from_millis(config.grace_ms),
            backoff: Duration::from_millis(config.backoff_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}
