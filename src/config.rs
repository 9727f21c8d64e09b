use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::gateway::cache::{DAMAGE, GALLERY, PEOPLE, WEAPONS};
use crate::gateway::retry::RetryPolicy;
use crate::gateway::PollConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub gateway: GatewayConfig,
  #[serde(default)]
  pub polling: PollingConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  pub sso: Option<SsoConfig>,
  #[serde(default)]
  pub proxy: ProxyConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Directory for daily rolling log files (stderr only when unset)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  /// Gateway base URL (e.g. "http://localhost:8082/tymg")
  pub url: String,
  /// Backend base URL, used for the Keycloak endpoints
  pub backend_url: String,
  pub timeout_secs: u64,
  /// Where queued job results are exposed
  pub result_path: String,
  /// Result path used by the damage endpoint
  pub damage_result_path: String,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8082/tymg".to_string(),
      backend_url: "http://localhost:8080/tymb".to_string(),
      timeout_secs: 10,
      result_path: "/api/async/result".to_string(),
      damage_result_path: "/api/request-status".to_string(),
    }
  }
}

/// Poll settings per call site, plus the retry policy for direct calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
  pub default: PollConfig,
  pub damage: PollConfig,
  pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// TTL in seconds per namespace
  pub ttl: CacheTtls,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl: CacheTtls::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
  pub people: i64,
  pub weapons: i64,
  pub gallery: i64,
  pub damage: i64,
}

impl Default for CacheTtls {
  fn default() -> Self {
    Self {
      people: 300,
      weapons: 300,
      gallery: 120,
      damage: 120,
    }
  }
}

/// Upper bound for a configured TTL (100 years).
const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

impl CacheConfig {
  /// TTL for a cache namespace. Unknown namespaces get five minutes.
  /// Negative values expire at once; values above a century are capped.
  pub fn ttl_for(&self, namespace: &str) -> Duration {
    let secs = match namespace {
      PEOPLE => self.ttl.people,
      WEAPONS => self.ttl.weapons,
      GALLERY => self.ttl.gallery,
      DAMAGE => self.ttl.damage,
      _ => 300,
    };
    Duration::seconds(secs.clamp(0, MAX_TTL_SECS))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SsoConfig {
  /// Keycloak base URL
  pub url: String,
  pub realm: String,
  pub client_id: String,
  pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
  pub listen: SocketAddr,
}

/// Spreadsheet sync endpoint (a Google Apps Script web app).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub url: Option<String>,
  pub timeout_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: 60,
    }
  }
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 4321)),
    }
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tymctl.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tymctl/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_overrides(
      std::env::var("TYMG_URL").ok(),
      std::env::var("TYMB_URL").ok(),
    ))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tymctl.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tymctl").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Apply gateway/backend URL overrides (from `TYMG_URL` / `TYMB_URL`).
  fn with_overrides(mut self, gateway_url: Option<String>, backend_url: Option<String>) -> Self {
    if let Some(url) = gateway_url.filter(|u| !u.trim().is_empty()) {
      self.gateway.url = url;
    }
    if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
      self.gateway.backend_url = url;
    }
    self
  }

  /// Get a bearer token from the environment.
  ///
  /// Checks TYMCTL_TOKEN. A token set here takes precedence over the stored one.
  pub fn token_from_env() -> Option<String> {
    std::env::var("TYMCTL_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
