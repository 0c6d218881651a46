//! Simulated message delivery
//!
//! There is no server. A [`Transport`] decides whether a message "arrives";
//! [`SimulatedTransport`] waits a fixed latency and then consults a
//! [`FailurePolicy`], which tests replace to force either outcome.
//!
//! [`retry_with_backoff`] re-runs any fallible async operation on an
//! exponential schedule.

use crate::config::DeliveryConfig;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message was accepted
    Delivered,
    /// The attempt failed; the message may be retried
    Failed,
}

impl DeliveryOutcome {
    /// Whether the attempt succeeded
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Decides whether a single delivery attempt fails
pub trait FailurePolicy: Send + Sync {
    /// Return `true` to fail the current attempt
    fn should_fail(&self) -> bool;
}

/// Fails each attempt independently with a fixed probability
#[derive(Debug, Clone, Copy)]
pub struct RandomFailure {
    rate: f64,
}

impl RandomFailure {
    /// Create a policy failing with probability `rate`, clamped to `0.0..=1.0`
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    /// Configured failure probability
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl FailurePolicy for RandomFailure {
    fn should_fail(&self) -> bool {
        rand::thread_rng().gen_bool(self.rate)
    }
}

/// Fails every attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFail;

impl FailurePolicy for AlwaysFail {
    fn should_fail(&self) -> bool {
        true
    }
}

/// Never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFail;

impl FailurePolicy for NeverFail {
    fn should_fail(&self) -> bool {
        false
    }
}

/// Carries a message to its destination
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to deliver `text`
    ///
    /// Failure is an ordinary outcome, not an error.
    async fn deliver(&self, text: &str) -> DeliveryOutcome;
}

/// Local stand-in for a network round-trip
#[derive(Clone)]
pub struct SimulatedTransport {
    latency: Duration,
    policy: Arc<dyn FailurePolicy>,
}

impl SimulatedTransport {
    /// Create a transport with the given latency and failure policy
    pub fn new(latency: Duration, policy: Arc<dyn FailurePolicy>) -> Self {
        Self { latency, policy }
    }

    /// Transport using the configured latency and a random failure rate
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(
            config.send_delay,
            Arc::new(RandomFailure::new(config.failure_rate)),
        )
    }

    /// Configured latency
    pub fn latency(&self) -> Duration {
        self.latency
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn deliver(&self, text: &str) -> DeliveryOutcome {
        tokio::time::sleep(self.latency).await;

        let outcome = if self.policy.should_fail() {
            DeliveryOutcome::Failed
        } else {
            DeliveryOutcome::Delivered
        };
        debug!(
            chars = text.chars().count(),
            outcome = ?outcome,
            "Simulated delivery finished"
        );
        outcome
    }
}

/// Schedule for [`retry_with_backoff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts including the first; 0 is treated as 1
    pub max_attempts: u32,
    /// Wait after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    /// Factor applied to the wait after each failure
    pub backoff_multiplier: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(800),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 2,
        }
    }
}

/// Run `operation` until it succeeds or the attempts run out
///
/// Between failures the wait starts at `initial_delay` and is multiplied by
/// `backoff_multiplier` each time, capped at `max_delay`. There is no wait
/// after the last attempt.
///
/// # Returns
/// * `Ok(T)` - The first successful result
/// * `Err(E)` - The error from the final attempt
pub async fn retry_with_backoff<T, E, F, Fut>(
    options: &RetryOptions,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut delay = options.initial_delay.min(options.max_delay);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                debug!(attempts = attempt, "Giving up after final attempt");
                return Err(e);
            }
            Err(_) => {
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = delay
                    .checked_mul(options.backoff_multiplier)
                    .unwrap_or(options.max_delay)
                    .min(options.max_delay);
                attempt += 1;
            }
        }
    }
}
