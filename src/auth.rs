//! Bearer token storage and Keycloak token verification / logout.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::config::SsoConfig;
use crate::gateway::cache::DATA_NAMESPACES;
use crate::gateway::ApiRequest;
use crate::session::Session;

/// Namespace holding the tokens; never cleared with cached data.
pub const AUTH_NAMESPACE: &str = "auth";
const TOKEN_KEY: &str = "token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Minimum gap between two introspection calls.
pub const VERIFY_COOLDOWN: Duration = Duration::from_secs(7);

/// Access and refresh tokens, persisted in the cache storage without expiry.
#[derive(Clone)]
pub struct TokenStore {
  storage: Arc<dyn CacheStorage>,
  /// Token supplied through the environment; wins over the stored one
  env_token: Option<String>,
}

impl TokenStore {
  pub fn new(storage: Arc<dyn CacheStorage>, env_token: Option<String>) -> Self {
    Self { storage, env_token }
  }

  fn read(&self, key: &str) -> Option<String> {
    match self.storage.get(AUTH_NAMESPACE, key) {
      Ok(Some(entry)) => serde_json::from_slice(&entry.data).ok(),
      Ok(None) => None,
      Err(e) => {
        warn!(error = %e, "failed to read {} from storage", key);
        None
      }
    }
  }

  fn write(&self, key: &str, value: &str) -> Result<()> {
    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize token: {}", e))?;
    self.storage.put(&CacheEntry {
      namespace: AUTH_NAMESPACE.to_string(),
      key: key.to_string(),
      data,
      cached_at: Utc::now(),
      expires_at: None,
    })
  }

  /// Current access token, if any.
  pub fn token(&self) -> Option<String> {
    self.env_token.clone().or_else(|| self.read(TOKEN_KEY))
  }

  pub fn refresh_token(&self) -> Option<String> {
    self.read(REFRESH_TOKEN_KEY)
  }

  pub fn set_token(&self, token: &str) -> Result<()> {
    self.write(TOKEN_KEY, token)
  }

  pub fn set_refresh_token(&self, token: &str) -> Result<()> {
    self.write(REFRESH_TOKEN_KEY, token)
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear_namespace(AUTH_NAMESPACE)?;
    Ok(())
  }
}

/// Per-session introspection bookkeeping.
#[derive(Debug, Default)]
pub struct VerifyState {
  last_token: Option<String>,
  last_checked: Option<Instant>,
  /// Verdict of the last completed check of `last_token`
  last_valid: Option<bool>,
  in_flight: bool,
}

impl VerifyState {
  /// The verdict to report when a check for `token` at `now` is skipped, or
  /// `None` when it should run. A repeated token gets its previous verdict.
  fn skipped_verdict(&self, token: &str, now: Instant) -> Option<bool> {
    if self.last_token.as_deref() == Some(token) {
      return Some(self.last_valid.unwrap_or(true));
    }
    let cooling = self
      .last_checked
      .map(|at| now.duration_since(at) < VERIFY_COOLDOWN)
      .unwrap_or(false);
    (self.in_flight || cooling).then_some(true)
  }

  fn begin(&mut self, token: &str, now: Instant) {
    self.in_flight = true;
    self.last_checked = Some(now);
    self.last_token = Some(token.to_string());
    self.last_valid = None;
  }

  /// Record the verdict for the token now stored. `None` means the backend
  /// could not be asked, so the token is not remembered.
  fn finish(&mut self, verdict: Option<bool>, current_token: Option<String>) {
    self.in_flight = false;
    match verdict {
      Some(valid) => {
        self.last_valid = Some(valid);
        if current_token.is_some() {
          self.last_token = current_token;
        }
      }
      None => self.last_token = None,
    }
  }
}

/// Outcome of a token check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
  pub valid: bool,
  pub token_refreshed: bool,
  /// No request was made; `valid` repeats the last verdict
  pub skipped: bool,
}

#[derive(Debug, Deserialize)]
struct IntrospectResponse {
  #[serde(default)]
  active: bool,
  access_token: Option<String>,
  refresh_token: Option<String>,
}

fn backend_url(session: &Session, path: &str) -> String {
  format!(
    "{}{}",
    session.config().gateway.backend_url.trim_end_matches('/'),
    path
  )
}

/// Check the stored token against the backend's introspection endpoint,
/// storing rotated tokens when the backend returns them.
pub async fn verify_token(session: &Session) -> Result<Verification> {
  let tokens = session.tokens();
  let token = match tokens.token() {
    Some(t) => t,
    None => {
      return Ok(Verification {
        valid: false,
        token_refreshed: false,
        skipped: false,
      })
    }
  };

  {
    let mut state = session.verify_state()?;
    let now = Instant::now();
    if let Some(valid) = state.skipped_verdict(&token, now) {
      debug!(valid, "token verification skipped");
      return Ok(Verification {
        valid,
        token_refreshed: false,
        skipped: true,
      });
    }
    state.begin(&token, now);
  }

  let mut form = vec![("token".to_string(), token.clone())];
  if let Some(refresh) = tokens.refresh_token().filter(|r| !r.trim().is_empty()) {
    form.push(("refreshToken".to_string(), refresh));
  }

  let request = ApiRequest::post(backend_url(session, "/keycloak/introspect"))
    .form(form)
    .without_auth();
  let outcome = introspect(session, request).await;
  let verdict = match &outcome {
    Ok(Some(v)) => Some(v.valid),
    _ => None,
  };
  session.verify_state()?.finish(verdict, tokens.token());

  Ok(outcome?.unwrap_or(Verification {
    valid: false,
    token_refreshed: false,
    skipped: false,
  }))
}

/// Ask the backend about the token. `None` when the backend could not answer.
async fn introspect(session: &Session, request: ApiRequest) -> Result<Option<Verification>> {
  let tokens = session.tokens();
  let response = match session.client().request::<IntrospectResponse>(request).await {
    Ok(r) => r,
    Err(e) => {
      warn!(error = %e, "token introspection failed");
      return Ok(None);
    }
  };

  if !response.active {
    info!("token is no longer active");
    return Ok(Some(Verification {
      valid: false,
      token_refreshed: false,
      skipped: false,
    }));
  }

  let refreshed = match response.access_token {
    Some(access) => {
      tokens.set_token(&access)?;
      if let Some(refresh) = response.refresh_token {
        tokens.set_refresh_token(&refresh)?;
      }
      true
    }
    None => false,
  };

  Ok(Some(Verification {
    valid: true,
    token_refreshed: refreshed,
    skipped: false,
  }))
}

/// Revoke the refresh token and clear everything stored locally.
pub async fn logout(session: &Session) -> Result<()> {
  let refresh = session
    .tokens()
    .refresh_token()
    .ok_or_else(|| eyre!("No refresh token stored; nothing to log out"))?;

  let request = ApiRequest::post(backend_url(session, "/keycloak/logout"))
    .form(vec![("refreshToken".to_string(), refresh)])
    .without_auth();
  session
    .client()
    .raw(request)
    .await
    .map_err(|e| eyre!("Logout failed: {}", e))?;

  let mut removed = 0;
  for namespace in DATA_NAMESPACES {
    removed += session.cache().clear_namespace(namespace)?;
  }
  session.tokens().clear()?;
  info!(removed, "logged out and cleared local data");
  Ok(())
}

/// OpenID Connect authorization URL for an interactive login.
pub fn login_url(sso: &SsoConfig) -> Result<Url> {
  let mut url = Url::parse(&format!(
    "{}/realms/{}/protocol/openid-connect/auth",
    sso.url.trim_end_matches('/'),
    sso.realm
  ))
  .map_err(|e| eyre!("Invalid SSO URL {}: {}", sso.url, e))?;

  url
    .query_pairs_mut()
    .append_pair("response_type", "code")
    .append_pair("scope", "openid")
    .append_pair("client_id", &sso.client_id)
    .append_pair("redirect_uri", &sso.redirect_uri);

  Ok(url)
}
