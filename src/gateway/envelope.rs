//! Serde types matching the backend's common response wrapper, and the
//! decoding rules applied to every gateway response.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::ApiError;

/// Backend response wrapper: `{ success, code, message, data, ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
  pub success: bool,
  pub code: i64,
  #[serde(default)]
  pub message: Value,
  #[serde(default)]
  pub timestamp: Option<String>,
  /// `Some(Value::Null)` when the field is present but null.
  #[serde(default, deserialize_with = "deserialize_present")]
  pub data: Option<Value>,
  #[serde(default)]
  pub request_id: Option<String>,
  #[serde(default)]
  pub total: Option<u64>,
  #[serde(default)]
  pub page: Option<u64>,
  #[serde(default)]
  pub page_size: Option<u64>,
  #[serde(default)]
  pub error: Option<String>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
  D: Deserializer<'de>,
{
  Value::deserialize(deserializer).map(Some)
}

impl Envelope {
  /// Recognize an envelope by its `success`, `code` and `message` keys.
  pub fn detect(value: &Value) -> Option<Envelope> {
    let obj = value.as_object()?;
    if !(obj.contains_key("success") && obj.contains_key("code") && obj.contains_key("message")) {
      return None;
    }
    serde_json::from_value(value.clone()).ok()
  }

  pub fn is_accepted(&self) -> bool {
    self.success && self.code == 202
  }

  /// Message to surface when the envelope reports a failure.
  pub fn failure_message(&self) -> String {
    match &self.message {
      Value::String(s) => s.clone(),
      _ => self
        .error
        .clone()
        .unwrap_or_else(|| format!("Backend error (code: {})", self.code)),
    }
  }

  fn failure_status(&self) -> u16 {
    u16::try_from(self.code)
      .ok()
      .filter(|c| (100..=599).contains(c))
      .unwrap_or(500)
  }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
  Json(Value),
  Text(String),
}

impl ResponseBody {
  pub fn into_value(self) -> Value {
    match self {
      ResponseBody::Json(v) => v,
      ResponseBody::Text(s) => Value::String(s),
    }
  }

  fn error_message(&self, status: u16) -> String {
    match self {
      ResponseBody::Text(s) if !s.is_empty() => s.clone(),
      ResponseBody::Json(v) => v
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| v.get("error").and_then(Value::as_str))
        .map(String::from)
        .unwrap_or_else(|| v.to_string()),
      _ => format!("HTTP {} Error", status),
    }
  }
}

/// A decoded gateway response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub body: ResponseBody,
  /// The envelope, when the body was wrapped in one.
  pub envelope: Option<Envelope>,
}

/// Apply the envelope rules to a raw response.
///
/// - A 202 success envelope is kept whole so the caller can read `requestId`.
/// - Any other success envelope is unwrapped to its `data`; a `null` data
///   field counts as present.
/// - A failure envelope, or a success envelope with no `data` field, becomes
///   [`ApiError::Http`] carrying the server message.
/// - Non-JSON bodies are returned as text; non-2xx statuses are errors.
pub fn decode_body(
  status: u16,
  content_type: Option<&str>,
  bytes: &[u8],
) -> Result<ApiResponse, ApiError> {
  let ok = (200..300).contains(&status);
  let is_json = content_type
    .map(|ct| ct.contains("application/json"))
    .unwrap_or(false);

  let mut envelope = None;
  let body = if is_json && !bytes.is_empty() {
    match serde_json::from_slice::<Value>(bytes) {
      Ok(value) => match Envelope::detect(&value) {
        Some(env) if env.is_accepted() => {
          envelope = Some(env);
          ResponseBody::Json(value)
        }
        Some(env) if env.success && env.data.is_some() => {
          let data = env.data.clone().unwrap_or_default();
          envelope = Some(env);
          ResponseBody::Json(data)
        }
        Some(env) => {
          return Err(ApiError::Http {
            status: env.failure_status(),
            message: env.failure_message(),
          })
        }
        None => ResponseBody::Json(value),
      },
      Err(e) if ok => return Err(ApiError::Decode(e.to_string())),
      Err(_) => ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
  } else if is_json {
    ResponseBody::Json(Value::Null)
  } else {
    ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned())
  };

  if !ok {
    return Err(ApiError::Http {
      status,
      message: body.error_message(status),
    });
  }

  Ok(ApiResponse {
    status,
    body,
    envelope,
  })
}
