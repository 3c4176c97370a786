//! Configuration for the sync engine.

use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Snapshot loader settings.
    pub load: LoadConfig,
    /// Channel reconnection settings.
    pub reconnect: ReconnectConfig,
    /// Fallback poller settings.
    pub poll: PollConfig,
    /// Quiet period collapsing bursts of auth changes.
    pub auth_debounce: Duration,
    /// Maximum change events held while the initial load is pending.
    pub max_pending_events: usize,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            load: LoadConfig::default(),
            reconnect: ReconnectConfig::default(),
            poll: PollConfig::default(),
            auth_debounce: Duration::from_secs(1),
            max_pending_events: 1024,
        }
    }

    /// Sets the loader configuration.
    pub fn with_load(mut self, load: LoadConfig) -> Self {
        self.load = load;
        self
    }

    /// Sets the reconnect configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the poller configuration.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the auth debounce window.
    pub fn with_auth_debounce(mut self, debounce: Duration) -> Self {
        self.auth_debounce = debounce;
        self
    }

    /// Sets the pending-event queue bound.
    pub fn with_max_pending_events(mut self, max: usize) -> Self {
        self.max_pending_events = max;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot loader settings.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Timeout for a single select request.
    pub request_timeout: Duration,
    /// Attempts per collection, including the first.
    pub max_attempts: u32,
    /// Backoff step; the wait before attempt `n + 1` is `step * n`.
    pub retry_step: Duration,
}

impl LoadConfig {
    /// Creates a loader configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_attempts: max_attempts.max(1),
            retry_step: Duration::from_secs(1),
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the backoff step.
    pub fn with_retry_step(mut self, step: Duration) -> Self {
        self.retry_step = step;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.retry_step.saturating_mul(attempt)
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Channel reconnection settings.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any retry delay.
    pub max_delay: Duration,
    /// Retries spent before giving up.
    pub max_retries: u32,
    /// How long a subscribe attempt may wait for acknowledgment.
    pub ack_timeout: Duration,
    /// Health check period.
    pub health_check_interval: Duration,
    /// A channel stuck in one state this long is acted on by the health check.
    pub stale_after: Duration,
}

impl ReconnectConfig {
    /// Creates a reconnect configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_retries,
            ack_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the acknowledgment timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the health check period.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Sets the staleness threshold.
    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after = after;
        self
    }

    /// Delay before retry `retry` (0-indexed): `min(base * 2^retry, max)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Fallback poller settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Tick period.
    pub interval: Duration,
    /// Minimum time between two reloads of any origin.
    pub min_gap: Duration,
}

impl PollConfig {
    /// Sets the tick period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the minimum reload gap.
    pub fn with_min_gap(mut self, gap: Duration) -> Self {
        self.min_gap = gap;
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            min_gap: Duration::from_secs(10),
        }
    }
}
