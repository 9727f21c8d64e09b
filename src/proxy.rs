//! Thin HTTP routes that forward to the gateway (`tymctl serve`).

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::{header, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::gateway::{ApiError, ApiRequest};
use crate::services::sync::{SyncReport, SyncService};
use crate::session::Session;

type ProxyResult<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
  #[error("Missing required parameter: {0}")]
  MissingParameter(&'static str),

  #[error("{0}")]
  Upstream(#[from] ApiError),

  #[error("gateway returned invalid JSON: {0}")]
  InvalidBody(#[from] serde_json::Error),

  #[error("Sync failed: {0}")]
  Sync(String),
}

impl IntoResponse for ProxyError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ProxyError::MissingParameter(_) => (
        StatusCode::BAD_REQUEST,
        json!({ "success": false, "message": self.to_string() }),
      ),
      _ => {
        warn!(error = %self, "proxy request failed");
        let message = match &self {
          ProxyError::Sync(_) => self.to_string(),
          _ => format!("Proxy failed: {}", self),
        };
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          json!({
            "success": false,
            "message": message,
            "error": format!("{:?}", self),
          }),
        )
      }
    };
    (status, Json(body)).into_response()
  }
}

type AppState = Arc<Session>;

async fn forward_json(session: &Session, request: ApiRequest) -> ProxyResult<Json<Value>> {
  let raw = session.client().forward(request.without_auth()).await?;
  Ok(Json(serde_json::from_slice(&raw.bytes)?))
}

fn required(value: Option<String>, name: &'static str) -> ProxyResult<String> {
  value
    .filter(|v| !v.trim().is_empty())
    .ok_or(ProxyError::MissingParameter(name))
}

#[derive(Debug, Deserialize)]
struct NameQuery {
  name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdQuery {
  id: Option<String>,
}

async fn people_names(State(session): State<AppState>) -> ProxyResult<Json<Value>> {
  forward_json(&session, ApiRequest::get("/people/names")).await
}

async fn people_update(
  State(session): State<AppState>,
  Json(body): Json<Value>,
) -> ProxyResult<Json<Value>> {
  forward_json(&session, ApiRequest::post("/people/update").json(body)).await
}

/// The backend answers with plain text here; pass it through as-is.
async fn damage_with_weapon(
  State(session): State<AppState>,
  Query(query): Query<NameQuery>,
) -> ProxyResult<Response> {
  let name = required(query.name, "name")?;
  let request = ApiRequest::get("/people/damageWithWeapon")
    .query("name", name)
    .without_auth();
  let raw = session.client().forward(request).await?;
  let text = String::from_utf8_lossy(&raw.bytes).into_owned();
  Ok(([(header::CONTENT_TYPE, "text/plain")], text).into_response())
}

async fn weapon_get(
  State(session): State<AppState>,
  Path(name): Path<String>,
) -> ProxyResult<Json<Value>> {
  let name = required(Some(name), "name")?;
  forward_json(&session, ApiRequest::get("/weapons").segment(name)).await
}

async fn weapon_delete(
  State(session): State<AppState>,
  Path(name): Path<String>,
) -> ProxyResult<Json<Value>> {
  let name = required(Some(name), "name")?;
  forward_json(&session, ApiRequest::delete("/weapons").segment(name)).await
}

async fn weapons_by_owner(
  State(session): State<AppState>,
  Path(owner): Path<String>,
) -> ProxyResult<Json<Value>> {
  let owner = required(Some(owner), "ownerName")?;
  forward_json(
    &session,
    ApiRequest::get("/weapons/owner").segment(owner),
  )
  .await
}

async fn gallery_all(State(session): State<AppState>) -> ProxyResult<Json<Value>> {
  forward_json(&session, ApiRequest::post("/gallery/getAll")).await
}

async fn gallery_by_id(
  State(session): State<AppState>,
  Query(query): Query<IdQuery>,
) -> ProxyResult<Json<Value>> {
  let id = required(query.id, "id")?;
  forward_json(&session, ApiRequest::get("/gallery/getById").query("id", id)).await
}

async fn gallery_update(
  State(session): State<AppState>,
  Json(body): Json<Value>,
) -> ProxyResult<Json<Value>> {
  forward_json(&session, ApiRequest::post("/gallery/update").json(body)).await
}

async fn sync_characters(
  State(session): State<AppState>,
  Json(characters): Json<Vec<Value>>,
) -> ProxyResult<Json<SyncReport>> {
  let report = SyncService::new(&session)
    .push(characters)
    .await
    .map_err(|e| ProxyError::Sync(e.to_string()))?;
  Ok(Json(report))
}

pub fn router(session: AppState) -> Router {
  Router::new()
    .route("/api/people/names", get(people_names))
    .route("/api/people/update", post(people_update))
    .route("/api/people/damageWithWeapon", get(damage_with_weapon))
    .route("/api/weapons/{name}", get(weapon_get).delete(weapon_delete))
    .route("/api/weapons/owner/{owner}", get(weapons_by_owner))
    .route("/api/gallery/getAll", get(gallery_all))
    .route("/api/gallery/getById", get(gallery_by_id))
    .route("/api/gallery/update", post(gallery_update))
    .route("/api/sync-characters", post(sync_characters))
    .with_state(session)
}

/// Serve the proxy routes on the configured address until the process exits.
pub async fn serve(session: AppState) -> Result<()> {
  let addr = session.config().proxy.listen;
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;

  info!(%addr, gateway = %session.client().base_url(), "proxy listening");
  axum::serve(listener, router(session))
    .await
    .map_err(|e| eyre!("Proxy server failed: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::testing::spawn_gateway;
  use crate::session::testing::{session_from, test_config};

  async fn proxy_for(gateway: Router) -> (String, reqwest::Client) {
    let base = spawn_gateway(gateway).await;
    let mut config = test_config(&base);
    config.sync.url = Some(format!("{}/exec", base));
    let session = Arc::new(session_from(config));
    (spawn_gateway(router(session)).await, reqwest::Client::new())
  }

  #[tokio::test]
  async fn test_forwards_weapon_lookup() {
    let gateway = Router::new().route(
      "/weapons/{name}",
      get(|Path(name): Path<String>| async move {
        Json(json!({"success": true, "code": 200, "message": "ok", "data": {"name": name}}))
      }),
    );
    let (proxy, http) = proxy_for(gateway).await;

    let body: Value = http
      .get(format!("{}/api/weapons/Flame%20Sword", proxy))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    // the upstream body is passed through untouched
    assert_eq!(body["data"]["name"], "Flame Sword");
    assert_eq!(body["success"], true);
  }

  #[tokio::test]
  async fn test_damage_is_plain_text() {
    let gateway = Router::new().route(
      "/people/damageWithWeapon",
      get(|Query(q): Query<NameQuery>| async move {
        assert_eq!(q.name.as_deref(), Some("Warrior"));
        "128"
      }),
    );
    let (proxy, http) = proxy_for(gateway).await;

    let response = http
      .get(format!("{}/api/people/damageWithWeapon?name=Warrior", proxy))
      .send()
      .await
      .unwrap();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.text().await.unwrap(), "128");
  }

  #[tokio::test]
  async fn test_missing_parameter_is_400() {
    let (proxy, http) = proxy_for(Router::new()).await;

    let response = http
      .get(format!("{}/api/gallery/getById", proxy))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Missing required parameter: id");
  }

  #[tokio::test]
  async fn test_upstream_failure_is_500() {
    let gateway = Router::new().route(
      "/gallery/getAll",
      post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let (proxy, http) = proxy_for(gateway).await;

    let response = http
      .get(format!("{}/api/gallery/getAll", proxy))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"]
      .as_str()
      .unwrap()
      .starts_with("Proxy failed: HTTP 502"));
  }

  #[tokio::test]
  async fn test_sync_characters_wraps_reply() {
    let script = Router::new().route(
      "/exec",
      post(|Json(rows): Json<Vec<Value>>| async move {
        assert_eq!(rows[0]["name"], "Warrior");
        "synced"
      }),
    );
    let (proxy, http) = proxy_for(script).await;

    let body: Value = http
      .post(format!("{}/api/sync-characters", proxy))
      .json(&json!([{"name": "Warrior"}, {"name": "Mage"}]))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], "synced");
    assert_eq!(body["characterCount"], 2);
  }

  #[tokio::test]
  async fn test_sync_failure_is_500() {
    let script = Router::new().route(
      "/exec",
      post(|| async { (StatusCode::FORBIDDEN, "denied") }),
    );
    let (proxy, http) = proxy_for(script).await;

    let response = http
      .post(format!("{}/api/sync-characters", proxy))
      .json(&json!([]))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Sync failed"));
    assert!(body["error"].is_string());
  }
}
