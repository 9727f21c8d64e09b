//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheResult, QueryKey};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the service facades and the gateway client. A
/// fresh entry is returned without calling the fetcher; a missing or expired
/// entry triggers exactly one fetch whose result is stored with the given TTL.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  clock: Clock,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      storage,
      clock: Arc::new(Utc::now),
    }
  }

  /// Replace the time source.
  #[cfg(test)]
  pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  fn now(&self) -> DateTime<Utc> {
    (self.clock)()
  }

  /// Return a fresh cached value, if any. Expired entries are removed.
  pub fn lookup<K, T>(&self, key: &K) -> Result<Option<CacheResult<T>>>
  where
    K: QueryKey,
    T: DeserializeOwned,
  {
    let namespace = key.namespace();
    let hash = key.cache_hash();

    let entry = match self.storage.get(namespace, &hash)? {
      Some(entry) => entry,
      None => return Ok(None),
    };

    if entry.is_expired(self.now()) {
      debug!(namespace, key = %key.description(), "cache entry expired");
      self.storage.remove(namespace, &hash)?;
      return Ok(None);
    }

    match serde_json::from_slice(&entry.data) {
      Ok(data) => Ok(Some(CacheResult::from_cache(data, entry.cached_at))),
      Err(e) => {
        warn!(namespace, key = %key.description(), error = %e, "dropping unreadable cache entry");
        self.storage.remove(namespace, &hash)?;
        Ok(None)
      }
    }
  }

  /// Store a value under `key` for `ttl`. An expiry past the end of the
  /// calendar is stored as no expiry.
  pub fn store<K, T>(&self, key: &K, data: &T, ttl: Duration) -> Result<()>
  where
    K: QueryKey,
    T: Serialize,
  {
    let now = self.now();
    let data = serde_json::to_vec(data).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;

    self.storage.put(&CacheEntry {
      namespace: key.namespace().to_string(),
      key: key.cache_hash(),
      data,
      cached_at: now,
      expires_at: now.checked_add_signed(ttl),
    })
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Fresh entry - return immediately, no fetch
  /// 2. Missing or expired - fetch once and store the result
  ///
  /// Fetch errors are returned and nothing is stored.
  pub async fn fetch<K, T, F, Fut>(&self, key: &K, ttl: Duration, fetcher: F) -> Result<CacheResult<T>>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(cached) = self.lookup(key)? {
      debug!(key = %key.description(), "cache hit");
      return Ok(cached);
    }

    let data = fetcher().await?;
    self.store(key, &data, ttl)?;
    Ok(CacheResult::from_network(data))
  }

  /// Drop one cached query.
  pub fn invalidate<K: QueryKey>(&self, key: &K) -> Result<bool> {
    self.storage.remove(key.namespace(), &key.cache_hash())
  }

  /// Drop every entry in a namespace.
  pub fn clear_namespace(&self, namespace: &str) -> Result<usize> {
    self.storage.clear_namespace(namespace)
  }

  /// Drop every entry outside `keep`.
  pub fn clear_except(&self, keep: &[&str]) -> Result<usize> {
    self.storage.clear_except(keep)
  }

  /// Expiry of a cached query, if it is cached.
  pub fn expiry<K: QueryKey>(&self, key: &K) -> Result<Option<DateTime<Utc>>> {
    Ok(
      self
        .storage
        .get(key.namespace(), &key.cache_hash())?
        .and_then(|entry| entry.expires_at),
    )
  }

  /// Entry counts per namespace.
  pub fn stats(&self) -> Result<BTreeMap<String, usize>> {
    self.storage.namespaces()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  struct Key(&'static str);

  impl QueryKey for Key {
    fn namespace(&self) -> &'static str {
      "damage"
    }

    fn cache_hash(&self) -> String {
      self.0.to_string()
    }

    fn description(&self) -> String {
      format!("damage for {}", self.0)
    }
  }

  fn layer_with_clock() -> (CacheLayer, Arc<Mutex<DateTime<Utc>>>) {
    let now = Arc::new(Mutex::new(Utc::now()));
    let clock = now.clone();
    let layer = CacheLayer::new(Arc::new(MemoryStorage::new()))
      .with_clock(move || *clock.lock().unwrap());
    (layer, now)
  }

  async fn fetch_counted(layer: &CacheLayer, calls: &AtomicUsize) -> CacheResult<i64> {
    layer
      .fetch(&Key("Warrior"), Duration::minutes(2), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(120)
      })
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn test_fresh_entry_skips_fetch() {
    let (layer, _) = layer_with_clock();
    let calls = AtomicUsize::new(0);

    let first = fetch_counted(&layer, &calls).await;
    let second = fetch_counted(&layer, &calls).await;

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, 120);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_expired_entry_fetches_once() {
    let (layer, now) = layer_with_clock();
    let calls = AtomicUsize::new(0);

    fetch_counted(&layer, &calls).await;
    *now.lock().unwrap() += Duration::minutes(3);

    let refreshed = fetch_counted(&layer, &calls).await;
    assert_eq!(refreshed.source, CacheSource::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // refreshed entry is fresh again
    let again = fetch_counted(&layer, &calls).await;
    assert_eq!(again.source, CacheSource::Cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_fetch_errors_are_not_cached() {
    let (layer, _) = layer_with_clock();
    let err = layer
      .fetch::<_, i64, _, _>(&Key("Ghost"), Duration::minutes(2), || async {
        Err(eyre!("gateway down"))
      })
      .await
      .unwrap_err();
    assert!(err.to_string().contains("gateway down"));
    assert!(layer.expiry(&Key("Ghost")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch() {
    let (layer, _) = layer_with_clock();
    let calls = AtomicUsize::new(0);

    fetch_counted(&layer, &calls).await;
    assert!(layer.invalidate(&Key("Warrior")).unwrap());
    fetch_counted(&layer, &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_huge_ttl_does_not_overflow() {
    let (layer, _) = layer_with_clock();
    layer
      .store(&Key("Warrior"), &120, Duration::seconds(i64::MAX / 1000))
      .unwrap();
    assert!(layer.expiry(&Key("Warrior")).unwrap().is_none());
    let hit: Option<CacheResult<i64>> = layer.lookup(&Key("Warrior")).unwrap();
    assert_eq!(hit.map(|h| h.data), Some(120));
  }

  #[test]
  fn test_unreadable_entry_is_a_miss() {
    let (layer, _) = layer_with_clock();
    layer.store(&Key("Warrior"), &"not a number", Duration::minutes(2)).unwrap();
    let got: Option<CacheResult<i64>> = layer.lookup(&Key("Warrior")).unwrap();
    assert!(got.is_none());
    assert!(layer.expiry(&Key("Warrior")).unwrap().is_none());
  }
}
