//! Waits for asynchronous backend jobs.
//!
//! A submitted job is checked through an "exists" endpoint; once a result
//! exists it is fetched and classified. Between checks the poller sleeps with
//! exponential backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::{ApiClient, ApiRequest};
use super::error::{ApiError, ErrorKind};
use super::types::{JobHandle, JobResult, JobStatus};

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  #[serde(rename = "interval_ms", deserialize_with = "deserialize_millis")]
  pub interval: Duration,
  pub max_attempts: u32,
  pub backoff_multiplier: f64,
  #[serde(rename = "max_interval_ms", deserialize_with = "deserialize_millis")]
  pub max_interval: Duration,
}

pub(crate) fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(1),
      max_attempts: 30,
      backoff_multiplier: 2.0,
      max_interval: Duration::from_secs(10),
    }
  }
}

impl PollConfig {
  /// Fixed interval, no backoff.
  pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
    Self {
      interval,
      max_attempts,
      backoff_multiplier: 1.0,
      max_interval: interval,
    }
  }

  /// Delay to wait after the given (1-based) unsuccessful attempt.
  pub fn delay(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63) as i32;
    let factor = self.backoff_multiplier.max(1.0).powi(exponent);
    let scaled = self.interval.as_secs_f64() * factor;
    let capped = scaled.min(self.max_interval.max(self.interval).as_secs_f64());
    Duration::from_secs_f64(capped)
  }
}

/// Where a job is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
  Submitted,
  Polling { attempt: u32 },
  Succeeded,
  Failed,
  TimedOut,
}

impl fmt::Display for PollState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PollState::Submitted => write!(f, "submitted"),
      PollState::Polling { attempt } => write!(f, "polling#{}", attempt),
      PollState::Succeeded => write!(f, "succeeded"),
      PollState::Failed => write!(f, "failed"),
      PollState::TimedOut => write!(f, "timed-out"),
    }
  }
}

/// Endpoints that expose job results.
#[derive(Debug, Clone)]
pub struct JobEndpoints {
  result_path: String,
}

impl JobEndpoints {
  pub fn new(result_path: impl Into<String>) -> Self {
    Self {
      result_path: result_path.into().trim_end_matches('/').to_string(),
    }
  }

  pub fn exists(&self, request_id: &str) -> ApiRequest {
    ApiRequest::get(self.result_path.clone())
      .segment(request_id)
      .segment("exists")
  }

  pub fn result(&self, request_id: &str) -> ApiRequest {
    ApiRequest::get(self.result_path.clone()).segment(request_id)
  }

  pub fn cleanup(&self, request_id: &str) -> ApiRequest {
    ApiRequest::delete(self.result_path.clone()).segment(request_id)
  }
}

/// Read an exists-endpoint body: either a bare boolean or `{ exists }`.
fn parse_exists(value: Value) -> Result<bool, ApiError> {
  match &value {
    Value::Bool(b) => Ok(*b),
    Value::Object(map) => map
      .get("exists")
      .and_then(Value::as_bool)
      .ok_or_else(|| ApiError::Decode(format!("unexpected exists response: {}", value))),
    _ => Err(ApiError::Decode(format!(
      "unexpected exists response: {}",
      value
    ))),
  }
}

/// Polls one job at a time. Each call to [`Poller::poll`] is independent;
/// concurrent polls share nothing.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
  config: PollConfig,
}

impl Poller {
  pub fn new(config: PollConfig) -> Self {
    Self { config }
  }

  /// Errors that mean "no result yet" rather than "give up".
  fn not_ready(err: &ApiError) -> bool {
    err.kind() == ErrorKind::NotFound || err.is_retryable()
  }

  /// Poll until the job reaches a terminal state.
  ///
  /// `exists` is called at most `max_attempts` times; `fetch` only after
  /// `exists` reports true. Returns the job's data on success.
  pub async fn poll<E, EFut, F, FFut>(
    &self,
    job: &JobHandle,
    mut exists: E,
    mut fetch: F,
  ) -> Result<Value, ApiError>
  where
    E: FnMut(String) -> EFut,
    EFut: Future<Output = Result<bool, ApiError>>,
    F: FnMut(String) -> FFut,
    FFut: Future<Output = Result<JobResult, ApiError>>,
  {
    let request_id = job.request_id.as_str();
    let max_attempts = self.config.max_attempts;
    debug!(request_id, state = %PollState::Submitted, "waiting for job");

    for attempt in 1..=max_attempts {
      let state = PollState::Polling { attempt };
      debug!(request_id, %state, max_attempts, "checking job");

      match exists(request_id.to_string()).await {
        Ok(true) => match fetch(request_id.to_string()).await {
          Ok(result) => match result.status {
            JobStatus::Success => {
              let elapsed_ms = (Utc::now() - job.submitted_at).num_milliseconds();
              info!(request_id = %result.request_id, state = %PollState::Succeeded, attempt, elapsed_ms, "job finished");
              return Ok(result.data);
            }
            JobStatus::Error => {
              warn!(request_id = %result.request_id, state = %PollState::Failed, message = %result.message, "job failed");
              let message = if result.message.is_empty() {
                "job reported an error".to_string()
              } else {
                result.message
              };
              return Err(ApiError::JobFailed {
                request_id: request_id.to_string(),
                message,
              });
            }
            JobStatus::Processing => {}
          },
          Err(e) if Self::not_ready(&e) => {
            debug!(request_id, error = %e, "result not readable yet");
          }
          Err(e) => return Err(e),
        },
        Ok(false) => {}
        Err(e) if Self::not_ready(&e) => {
          debug!(request_id, error = %e, "exists check failed, retrying");
        }
        Err(e) => return Err(e),
      }

      if attempt < max_attempts {
        tokio::time::sleep(self.config.delay(attempt)).await;
      }
    }

    warn!(request_id, state = %PollState::TimedOut, max_attempts, "gave up waiting for job");
    Err(ApiError::PollTimeout {
      request_id: request_id.to_string(),
      attempts: max_attempts,
    })
  }

  /// Poll a job through the gateway's result endpoints, then remove the
  /// stored result.
  pub async fn wait(
    &self,
    client: &ApiClient,
    job: &JobHandle,
    endpoints: &JobEndpoints,
  ) -> Result<Value, ApiError> {
    let data = self
      .poll(
        job,
        |id| {
          let client = client.clone();
          let req = endpoints.exists(&id);
          async move { parse_exists(client.request::<Value>(req).await?) }
        },
        |id| {
          let client = client.clone();
          let req = endpoints.result(&id);
          async move {
            let value = client.request::<Value>(req).await?;
            Ok::<_, ApiError>(JobResult::from_value(&id, value))
          }
        },
      )
      .await?;

    if let Err(e) = client.raw(endpoints.cleanup(&job.request_id)).await {
      debug!(request_id = %job.request_id, error = %e, "result cleanup failed");
    }

    Ok(data)
  }
}
