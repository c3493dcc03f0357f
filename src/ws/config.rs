#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_DEBOUNCE_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval for sending heartbeat messages while the connection is open
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Maximum time a handshake may take before the attempt is abandoned
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Calls to `connect` closer together than this are ignored
    #[builder(default = DEFAULT_DEBOUNCE_DURATION)]
    pub debounce: Duration,
    /// Capacity of the broadcast channel used by [`crate::ws::ConnectionManager::subscribe`]
    #[builder(default = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            debounce: DEFAULT_DEBOUNCE_DURATION,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The delay before the `k`-th consecutive reconnect (1-indexed) is
/// `min(base_delay * 2^(k-1), max_delay)`. No jitter is applied.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Number of consecutive involuntary closes after which the manager
    /// gives up and reports [`crate::ws::Status::Failed`]. At most
    /// `max_attempts - 1` reconnects are attempted.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt
    #[builder(default = DEFAULT_BASE_DELAY_DURATION)]
    pub base_delay: Duration,
    /// Upper bound for any single reconnect delay
    #[builder(default = DEFAULT_MAX_DELAY_DURATION)]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY_DURATION,
            max_delay: DEFAULT_MAX_DELAY_DURATION,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before reconnect attempt `attempt` (1-indexed).
    ///
    /// Attempt `0` is treated as attempt `1`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Deterministic capped exponential policy driven by [`ReconnectConfig`].
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl From<ReconnectConfig> for ReconnectBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }
}

impl backoff::backoff::Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.config.delay_for_attempt(self.attempt))
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn default_delays_double_then_cap() {
        let config = ReconnectConfig::default();

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(30));
    }

    #[test]
    fn large_attempts_saturate_at_max() {
        let config = ReconnectConfig::builder()
            .base_delay(Duration::from_millis(250))
            .max_delay(Duration::from_secs(5))
            .build();

        assert_eq!(config.delay_for_attempt(40), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn backoff_sequence_stops_after_max_attempts() {
        let mut backoff: ReconnectBackoff = ReconnectConfig::default().into();

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(20)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(30)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let config = ReconnectConfig::builder().max_attempts(0).build();
        let mut backoff: ReconnectBackoff = config.into();

        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn default_timings() {
        let config = Config::default();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.debounce, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn builder_defaults_match_default_impl() {
        let built = Config::builder().build();
        let default = Config::default();

        assert_eq!(built.heartbeat_interval, default.heartbeat_interval);
        assert_eq!(built.connect_timeout, default.connect_timeout);
        assert_eq!(built.debounce, default.debounce);
        assert_eq!(built.channel_capacity, default.channel_capacity);
        assert_eq!(built.reconnect.base_delay, default.reconnect.base_delay);
    }
}
