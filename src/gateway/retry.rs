//! Exponential-backoff retry for individual gateway calls.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::error::ApiError;
use super::poller::deserialize_millis;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  #[serde(rename = "base_delay_ms", deserialize_with = "deserialize_millis")]
  pub base_delay: Duration,
  #[serde(rename = "max_delay_ms", deserialize_with = "deserialize_millis")]
  pub max_delay: Duration,
  pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(10),
      backoff_multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// Delay after `current`, grown by the multiplier and capped at
  /// `max_delay`.
  fn next_delay(&self, current: Duration) -> Duration {
    let cap = self.max_delay.as_secs_f64();
    let scaled = current.as_secs_f64() * self.backoff_multiplier.max(1.0);
    if scaled.is_finite() {
      Duration::from_secs_f64(scaled.min(cap))
    } else {
      self.max_delay
    }
  }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out. The last error is returned.
pub async fn with_retry<T, F, Fut>(
  policy: &RetryPolicy,
  op_name: &str,
  mut op: F,
) -> Result<T, ApiError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, ApiError>>,
{
  let mut delay = policy.base_delay;
  let mut attempt = 1;

  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
        warn!(op = op_name, attempt, error = %e, "retrying in {:?}", delay);
        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}
