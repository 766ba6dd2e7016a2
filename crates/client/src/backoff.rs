//! Reconnect schedule
//!
//! Attempt `n` (1-based) waits `base_delay * 2^(n-1)`. Once `max_attempts`
//! delays have been handed out the schedule is exhausted and the caller is
//! expected to give up. A successful connection resets it.

use std::time::Duration;

use crate::config::ChannelConfig;

/// Exponential reconnect backoff, usable as a `tokio-retry` strategy
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
    jitter: bool,
}

impl ReconnectBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempt: 0,
            jitter: false,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.base_delay, config.max_attempts).with_jitter(config.jitter)
    }

    /// Randomize each delay with `tokio_retry::strategy::jitter`
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay before attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
    }
}

impl Iterator for ReconnectBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;

        let delay = self.delay_for(self.attempt);
        if self.jitter {
            Some(tokio_retry::strategy::jitter(delay))
        } else {
            Some(delay)
        }
    }
}
