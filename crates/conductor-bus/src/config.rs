use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};

/// Delivery and housekeeping settings for [`crate::CommunicationBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Delivery attempts before a message is moved to the failed buffer.
    #[serde(default = "default_max_attempts")]
    pub max_delivery_attempts: u32,
    /// Retry delay is `backoff_base_ms * 2^attempt`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Capacity of the failed-message ring buffer.
    #[serde(default = "default_failed_buffer_size")]
    pub failed_buffer_size: usize,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Lifetime of undelivered high, urgent and critical messages.
    #[serde(default = "default_urgent_expiry_secs")]
    pub urgent_expiry_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_failed_buffer_size() -> usize {
    1_000
}
fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_urgent_expiry_secs() -> u64 {
    1_800
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            failed_buffer_size: default_failed_buffer_size(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            urgent_expiry_secs: default_urgent_expiry_secs(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_delivery_attempts == 0 {
            return Err(ConductorError::Config(
                "max_delivery_attempts must be at least 1".into(),
            ));
        }
        if self.failed_buffer_size == 0 {
            return Err(ConductorError::Config(
                "failed_buffer_size must be at least 1".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConductorError::Config(
                "cleanup_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Delay before re-enqueueing after the given failed attempt.
    pub fn retry_delay_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = BusConfig::default();
        assert_eq!(config.retry_delay_ms(0), 1_000);
        assert_eq!(config.retry_delay_ms(1), 2_000);
        assert_eq!(config.retry_delay_ms(2), 4_000);
        assert_eq!(config.retry_delay_ms(30), 60_000);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = BusConfig {
            max_delivery_attempts: 0,
            ..BusConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
