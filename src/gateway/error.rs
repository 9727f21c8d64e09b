//! Error type shared by the request helper, the poller and the retry helper.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a failed call, derived from its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Network,
  Authentication,
  Authorization,
  Validation,
  NotFound,
  Server,
  Timeout,
  RateLimit,
  JobFailed,
  Unknown,
}

impl ErrorKind {
  /// Whether a later attempt at the same call could plausibly succeed.
  pub fn is_retryable(self) -> bool {
    matches!(
      self,
      ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server | ErrorKind::RateLimit
    )
  }
}

/// Failure of a gateway call.
///
/// Every variant carries an HTTP status through [`ApiError::status`]; failures
/// that never produced a response report status 0.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out after {}ms", .0.as_millis())]
  Timeout(Duration),

  #[error("invalid URL {0}")]
  InvalidUrl(String),

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("job {request_id} failed: {message}")]
  JobFailed { request_id: String, message: String },

  #[error("job {request_id} did not complete after {attempts} attempts")]
  PollTimeout { request_id: String, attempts: u32 },
}

impl ApiError {
  pub fn status(&self) -> u16 {
    match self {
      ApiError::Http { status, .. } => *status,
      _ => 0,
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::Http { status, .. } => match *status {
        400 | 422 => ErrorKind::Validation,
        401 => ErrorKind::Authentication,
        403 => ErrorKind::Authorization,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Unknown,
      },
      ApiError::Network(_) => ErrorKind::Network,
      ApiError::Timeout(_) | ApiError::PollTimeout { .. } => ErrorKind::Timeout,
      ApiError::JobFailed { .. } => ErrorKind::JobFailed,
      ApiError::InvalidUrl(_) | ApiError::Decode(_) => ErrorKind::Unknown,
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.kind().is_retryable()
  }

  /// Map a transport-level reqwest failure. `timeout` is the budget that was
  /// applied to the request.
  pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
    if err.is_timeout() {
      ApiError::Timeout(timeout)
    } else if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    ApiError::Decode(err.to_string())
  }
}
