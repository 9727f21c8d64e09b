use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handle for an asynchronous backend job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
  pub request_id: String,
  pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
  pub fn new(request_id: impl Into<String>) -> Self {
    Self {
      request_id: request_id.into(),
      submitted_at: Utc::now(),
    }
  }
}

/// Status of a job as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
  Processing,
  Success,
  Error,
}

impl From<&str> for JobStatus {
  fn from(s: &str) -> Self {
    match s.to_ascii_lowercase().as_str() {
      "success" | "completed" => JobStatus::Success,
      "error" | "failed" => JobStatus::Error,
      _ => JobStatus::Processing,
    }
  }
}

/// Result record for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
  pub request_id: String,
  pub status: JobStatus,
  pub message: String,
  pub data: Value,
}

impl JobResult {
  /// Interpret a result-endpoint body. Bodies without a `status` field are
  /// treated as the finished payload itself.
  pub fn from_value(request_id: &str, value: Value) -> Self {
    let status = value.get("status").and_then(Value::as_str).map(JobStatus::from);
    match status {
      Some(status) => JobResult {
        request_id: request_id.to_string(),
        status,
        message: value
          .get("message")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
        data: value.get("data").cloned().unwrap_or(Value::Null),
      },
      None => JobResult {
        request_id: request_id.to_string(),
        status: JobStatus::Success,
        message: String::new(),
        data: value,
      },
    }
  }
}

/// Outcome of submitting an operation that may be queued.
#[derive(Debug, Clone)]
pub enum Submission<T> {
  /// The backend queued the work; poll for its result.
  Accepted(JobHandle),
  /// The gateway answered synchronously.
  Completed(T),
}

/// Person record. `name` is the primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name_original: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code_name: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub physic_power: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub magic_power: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utility_power: Option<i64>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dob: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub race: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attributes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gender: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub height_cm: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub weight_kg: Option<f64>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub profession: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub combat: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub job: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub known_as: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub personality: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub faction: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub army_id: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub army_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dept_id: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dept_name: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub age: Option<i64>,

  // JSON-encoded attribute blobs, passed through untouched
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub base_attributes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bonus_attributes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state_attributes: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<i64>,
}

/// Weapon record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weapon {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  pub name: String,
  #[serde(default)]
  pub owner: String,
  #[serde(default)]
  pub attributes: String,
  #[serde(default)]
  pub base_damage: i64,
  #[serde(default)]
  pub bonus_damage: i64,
  #[serde(default)]
  pub bonus_attributes: Vec<String>,
  #[serde(default)]
  pub state_attributes: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
}

/// Gallery image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
  pub id: i64,
  pub image_base64: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GallerySaveRequest {
  pub image_base64: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryUpdateRequest {
  pub id: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_base64: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_job_status_wire_values() {
    assert_eq!(JobStatus::from("SUCCESS"), JobStatus::Success);
    assert_eq!(JobStatus::from("completed"), JobStatus::Success);
    assert_eq!(JobStatus::from("failed"), JobStatus::Error);
    assert_eq!(JobStatus::from("PENDING"), JobStatus::Processing);
  }

  #[test]
  fn test_job_result_with_status() {
    let result = JobResult::from_value(
      "r1",
      json!({"requestId": "r1", "status": "SUCCESS", "data": {"name": "Warrior"}}),
    );
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.data, json!({"name": "Warrior"}));
  }

  #[test]
  fn test_job_result_bare_payload() {
    let result = JobResult::from_value("r1", json!(120));
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.data, json!(120));
  }

  #[test]
  fn test_person_ignores_unknown_fields() {
    let person: Person =
      serde_json::from_value(json!({"name": "Warrior", "magicPower": 40, "proxy": "x"})).unwrap();
    assert_eq!(person.name, "Warrior");
    assert_eq!(person.magic_power, Some(40));
  }
}
