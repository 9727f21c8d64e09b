//! Per-process context shared by the service facades, the proxy and the CLI.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::auth::{self, TokenStore, Verification, VerifyState};
use crate::cache::{CacheLayer, CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
use crate::config::Config;
use crate::gateway::retry::RetryPolicy;
use crate::gateway::{ApiClient, JobEndpoints, Poller};

/// Everything a gateway call needs: configuration, HTTP client, cache and
/// token state.
pub struct Session {
  config: Config,
  client: ApiClient,
  cache: CacheLayer,
  tokens: TokenStore,
  verify: Mutex<VerifyState>,
}

impl Session {
  /// Open a session backed by the on-disk cache, or by memory when
  /// `in_memory` is set.
  pub fn open(config: Config, in_memory: bool) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = if in_memory {
      Arc::new(MemoryStorage::new())
    } else {
      Arc::new(SqliteStorage::open()?)
    };
    Self::with_storage(config, storage, Config::token_from_env())
  }

  /// Build a session over an existing storage backend.
  ///
  /// Tokens always go to `storage`; cached gateway data only does when
  /// caching is enabled.
  pub fn with_storage(
    config: Config,
    storage: Arc<dyn CacheStorage>,
    env_token: Option<String>,
  ) -> Result<Self> {
    let tokens = TokenStore::new(storage.clone(), env_token);
    let client = ApiClient::new(&config.gateway, tokens.clone())?;

    let cache = if config.cache.enabled {
      CacheLayer::new(storage)
    } else {
      debug!("response caching disabled");
      CacheLayer::new(Arc::new(NoopStorage))
    };

    Ok(Self {
      config,
      client,
      cache,
      tokens,
      verify: Mutex::new(VerifyState::default()),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn tokens(&self) -> &TokenStore {
    &self.tokens
  }

  pub(crate) fn verify_state(&self) -> Result<MutexGuard<'_, VerifyState>> {
    self
      .verify
      .lock()
      .map_err(|_| eyre!("Token verification state is poisoned"))
  }

  /// TTL for a cache namespace.
  pub fn ttl(&self, namespace: &str) -> Duration {
    self.config.cache.ttl_for(namespace)
  }

  /// Poller for queued people/weapon/gallery operations.
  pub fn poller(&self) -> Poller {
    Poller::new(self.config.polling.default)
  }

  /// Poller for damage calculations.
  pub fn damage_poller(&self) -> Poller {
    Poller::new(self.config.polling.damage)
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.config.polling.retry
  }

  pub fn job_endpoints(&self) -> JobEndpoints {
    JobEndpoints::new(self.config.gateway.result_path.clone())
  }

  pub fn damage_endpoints(&self) -> JobEndpoints {
    JobEndpoints::new(self.config.gateway.damage_result_path.clone())
  }

  pub async fn verify_token(&self) -> Result<Verification> {
    auth::verify_token(self).await
  }

  pub async fn logout(&self) -> Result<()> {
    auth::logout(self).await
  }
}
