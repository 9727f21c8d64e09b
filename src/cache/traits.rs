//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifies a cached query.
pub trait QueryKey {
  /// Namespace the entry lives in; also selects its TTL.
  fn namespace(&self) -> &'static str;

  /// Stable storage key within the namespace.
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;
}

/// A stored value with its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub namespace: String,
  pub key: String,
  /// Serialized JSON
  pub data: Vec<u8>,
  pub cached_at: DateTime<Utc>,
  /// `None` never expires (used for auth tokens).
  pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.map(|at| now >= at).unwrap_or(false)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
  /// Fetched from the gateway on this call
  Network,
  /// Served from an unexpired cache entry
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn test_expiry_boundary() {
    let now = Utc::now();
    let entry = CacheEntry {
      namespace: "damage".into(),
      key: "Warrior".into(),
      data: b"120".to_vec(),
      cached_at: now,
      expires_at: Some(now + Duration::minutes(2)),
    };
    assert!(!entry.is_expired(now));
    assert!(!entry.is_expired(now + Duration::seconds(119)));
    assert!(entry.is_expired(now + Duration::minutes(2)));
  }

  #[test]
  fn test_no_expiry() {
    let now = Utc::now();
    let entry = CacheEntry {
      namespace: "auth".into(),
      key: "token".into(),
      data: b"\"abc\"".to_vec(),
      cached_at: now,
      expires_at: None,
    };
    assert!(!entry.is_expired(now + Duration::days(365)));
  }
}
