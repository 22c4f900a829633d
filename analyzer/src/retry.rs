//! Exponential backoff with jitter.
//!
//! Sleep before retry `n` (0-based) is `min(initial * 2^n, max)` plus up to
//! `jitter_fraction` of that. Once the backoff nears `max` the base is lowered
//! to `max / (1 + jitter_fraction)`, so sleeps at the cap still differ between
//! callers but never exceed `max`. Nothing sleeps after the final attempt, so
//! a full run waits at most `(max_attempts - 1) * max_delay`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior on lookups and transient storage errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one). Zero is
    /// treated as one; see [`RetryPolicy::attempts`].
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single sleep, jitter included.
    pub max_delay: Duration,
    /// Random extra delay as a fraction of the backoff, 0.0..=1.0.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Short policy for calls that sit on a request path.
    pub fn lightweight() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_fraction: 0.3,
        }
    }

    /// Deterministic backoff before retry `attempt`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Number of attempts actually made. The first attempt always runs, so a
    /// policy configured with zero behaves like one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff plus random jitter, never above `max_delay`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.backoff(attempt);
        let fraction = self.jitter_fraction.clamp(0.0, 1.0);
        if fraction == 0.0 {
            return base;
        }
        // Leave headroom under the cap for the jitter.
        let base = base.min(self.max_delay.div_f64(1.0 + fraction));
        let jitter = base.mul_f64(fraction * rng.random::<f64>());
        (base + jitter).min(self.max_delay)
    }

    /// Sleep before retry `attempt`, unless `attempt` was the last one.
    /// Returns `false` when attempts are exhausted.
    pub async fn pause(&self, attempt: u32) -> bool {
        if attempt + 1 >= self.attempts() {
            return false;
        }
        let delay = self.delay_for(attempt, &mut rand::rng());
        tokio::time::sleep(delay).await;
        true
    }

    /// Run `op` until it succeeds or attempts are exhausted, returning the
    /// last error.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max_attempts = self.attempts(),
                        error = %e,
                        "attempt failed"
                    );
                    if !self.pause(attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
