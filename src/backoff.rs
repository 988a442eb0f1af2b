//! Exponential reconnection backoff with symmetric jitter.

use crate::config::BackoffConfig;
use crate::error::{ConnectorError, Result};
use rand::Rng;
use std::time::Duration;

/// Attempt counter plus the policy that turns it into delays.
///
/// The counter only grows between a disconnect and the next successful
/// authentication; [`Backoff::reset`] zeroes it.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt_count: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn has_reached_max_attempts(&self) -> bool {
        self.attempt_count >= self.config.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Delay before the next attempt; bumps the attempt counter.
    ///
    /// Callers must check [`Backoff::has_reached_max_attempts`] first.
    pub fn next_delay(&mut self) -> Result<Duration> {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Duration> {
        if self.has_reached_max_attempts() {
            return Err(ConnectorError::MaxReconnectAttempts {
                attempts: self.attempt_count,
                max: self.config.max_attempts,
            });
        }
        let base = self.pre_jitter_delay(self.attempt_count);
        self.attempt_count += 1;
        Ok(apply_jitter(base, self.config.jitter_factor, rng))
    }

    /// `min(base * 2^attempt, max)`, before jitter.
    pub fn pre_jitter_delay(&self, attempt: u32) -> Duration {
        // 2^31 already overflows any sane base delay; clamp the exponent.
        let factor = 1u32 << attempt.min(31);
        self.config
            .base_delay
            .checked_mul(factor)
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay))
    }
}

/// Upper bound on the jitter factor so `1 + offset` stays positive.
const MAX_JITTER_FACTOR: f64 = 0.99;

fn apply_jitter<R: Rng + ?Sized>(delay: Duration, jitter_factor: f64, rng: &mut R) -> Duration {
    // NaN and negative factors disable jitter.
    if jitter_factor.is_nan() || jitter_factor <= 0.0 {
        return delay;
    }
    let factor = jitter_factor.min(MAX_JITTER_FACTOR);
    let offset = rng.gen_range(-factor..=factor);
    delay.mul_f64(1.0 + offset)
}
