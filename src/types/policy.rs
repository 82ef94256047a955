//! Acknowledgement and reconnect policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_RECONNECT_INTERVAL_SECS;

/// What a listener does with a message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Acknowledge every message whatever the handler returned.
    #[default]
    Always,
    /// Acknowledge on `0`, otherwise reject and requeue.
    OnSuccess,
}

impl AckPolicy {
    /// Whether a message with this handler result should be acknowledged.
    pub fn should_ack(&self, code: i32) -> bool {
        match self {
            AckPolicy::Always => true,
            AckPolicy::OnSuccess => code == 0,
        }
    }
}

/// Backoff applied between losing a connection and rebuilding it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub interval: Duration,
    /// Attempts before the supervisor returns an error
    pub max_attempts: u32,
    /// Growth factor applied to the delay after each failed attempt
    pub multiplier: f64,
    /// Cap for the grown delay
    pub max_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_RECONNECT_INTERVAL_SECS),
            max_attempts: 1,
            multiplier: 1.0,
            max_interval: Duration::from_secs(DEFAULT_RECONNECT_INTERVAL_SECS),
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, single attempt.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: 1,
            multiplier: 1.0,
            max_interval: interval,
        }
    }

    /// Allow up to `attempts` reconnects.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Grow the delay by `multiplier` after each failure, up to `max_interval`.
    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    /// Delay before attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.multiplier <= 1.0 {
            return self.interval;
        }

        let factor = self.multiplier.powi(attempt as i32);
        let grown = self.interval.as_secs_f64() * factor;
        let capped = grown.min(self.max_interval.as_secs_f64().max(self.interval.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }
}
