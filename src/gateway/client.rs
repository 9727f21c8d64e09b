use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::TokenStore;
use crate::config::GatewayConfig;

use super::envelope::{decode_body, ApiResponse};
use super::error::ApiError;
use super::types::{JobHandle, Submission};

/// A single gateway call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the gateway base URL, or an absolute URL.
  pub path: String,
  /// Extra path segments, percent-encoded when the URL is built.
  pub segments: Vec<String>,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub form: Option<Vec<(String, String)>>,
  /// Attach the bearer token when one is stored.
  pub auth: bool,
  pub timeout: Option<Duration>,
  /// Treat any body carrying a `requestId` as a queued job.
  pub queued_on_request_id: bool,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      segments: Vec::new(),
      query: Vec::new(),
      body: None,
      form: None,
      auth: true,
      timeout: None,
      queued_on_request_id: false,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn segment(mut self, segment: impl Into<String>) -> Self {
    self.segments.push(segment.into());
    self
  }

  pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.push((key.into(), value.into()));
    self
  }

  pub fn json(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
    self.form = Some(fields);
    self
  }

  pub fn without_auth(mut self) -> Self {
    self.auth = false;
    self
  }

  /// For endpoints that answer with a bare `{ requestId }` whatever the
  /// HTTP status.
  pub fn queued_on_request_id(mut self) -> Self {
    self.queued_on_request_id = true;
    self
  }

  fn sends_body(&self) -> bool {
    !matches!(self.method, Method::GET | Method::HEAD)
  }
}

/// Undecoded upstream response, used by the proxy routes.
#[derive(Debug, Clone)]
pub struct RawResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

/// HTTP client for the gateway.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: String,
  timeout: Duration,
  tokens: TokenStore,
}

impl ApiClient {
  pub fn new(config: &GatewayConfig, tokens: TokenStore) -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.url.trim_end_matches('/').to_string(),
      timeout: Duration::from_secs(config.timeout_secs),
      tokens,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url_for(&self, req: &ApiRequest) -> Result<Url, ApiError> {
    let raw = if req.path.starts_with("http://") || req.path.starts_with("https://") {
      req.path.clone()
    } else {
      format!("{}{}", self.base_url, req.path)
    };

    let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;

    if !req.segments.is_empty() {
      url
        .path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(raw.clone()))?
        .pop_if_empty()
        .extend(&req.segments);
    }

    if !req.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&req.query);
    }

    Ok(url)
  }

  async fn send(&self, req: &ApiRequest) -> Result<RawResponse, ApiError> {
    let url = self.url_for(req)?;
    let timeout = req.timeout.unwrap_or(self.timeout);

    let mut builder = self
      .http
      .request(req.method.clone(), url.clone())
      .timeout(timeout)
      .header(ACCEPT, "application/json");

    if req.auth {
      if let Some(token) = self.tokens.token() {
        builder = builder.bearer_auth(token);
      }
    }

    if req.sends_body() {
      if let Some(form) = &req.form {
        builder = builder.form(form);
      } else if let Some(body) = &req.body {
        builder = builder.json(body);
      }
    }

    debug!(method = %req.method, %url, "gateway request");

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::from_transport(e, timeout))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let bytes = response
      .bytes()
      .await
      .map_err(|e| ApiError::from_transport(e, timeout))?;

    debug!(%status, %url, "gateway response");

    Ok(RawResponse {
      status,
      content_type,
      bytes: bytes.to_vec(),
    })
  }

  /// Send a request and apply the envelope rules to the response.
  pub async fn raw(&self, req: ApiRequest) -> Result<ApiResponse, ApiError> {
    let raw = self.send(&req).await?;
    decode_body(raw.status, raw.content_type.as_deref(), &raw.bytes)
  }

  /// Send a request and return the upstream body untouched.
  ///
  /// Non-2xx statuses are still errors.
  pub async fn forward(&self, req: ApiRequest) -> Result<RawResponse, ApiError> {
    let raw = self.send(&req).await?;
    if !(200..300).contains(&raw.status) {
      return Err(ApiError::Http {
        status: raw.status,
        message: format!("Gateway responded with {}", raw.status),
      });
    }
    Ok(raw)
  }

  /// Send a request and deserialize the unwrapped body.
  pub async fn request<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<T, ApiError> {
    let response = self.raw(req).await?;
    Ok(serde_json::from_value(response.body.into_value())?)
  }

  /// Send a request that the backend may queue.
  pub async fn submit<T: DeserializeOwned>(
    &self,
    req: ApiRequest,
  ) -> Result<Submission<T>, ApiError> {
    let any_request_id = req.queued_on_request_id;
    let response = self.raw(req).await?;

    if let Some(env) = response.envelope.as_ref().filter(|e| e.is_accepted()) {
      let request_id = env
        .request_id
        .clone()
        .ok_or_else(|| ApiError::Decode("accepted response without requestId".into()))?;
      return Ok(Submission::Accepted(JobHandle::new(request_id)));
    }

    let status = response.status;
    let value = response.body.into_value();
    if let Some(request_id) = pending_request_id(&value, status, any_request_id) {
      return Ok(Submission::Accepted(JobHandle::new(request_id)));
    }

    Ok(Submission::Completed(serde_json::from_value(value)?))
  }
}

/// Recognize a bare producer acknowledgement: `{ requestId }` sent with
/// HTTP 202, or `{ requestId, status: "processing" | "PENDING" }`. With
/// `any_request_id` a string `requestId` alone is enough.
fn pending_request_id(value: &Value, http_status: u16, any_request_id: bool) -> Option<String> {
  let request_id = value.get("requestId")?.as_str()?;
  let queued = any_request_id
    || http_status == 202
    || value
      .get("status")
      .and_then(Value::as_str)
      .map(|s| matches!(s.to_ascii_lowercase().as_str(), "processing" | "pending"))
      .unwrap_or(false);
  queued.then(|| request_id.to_string())
}
