use color_eyre::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::cache::CacheResult;
use crate::gateway::cache::{GatewayQueryKey, GALLERY};
use crate::gateway::types::{GalleryImage, GallerySaveRequest, GalleryUpdateRequest};
use crate::gateway::ApiRequest;
use crate::session::Session;

pub struct GalleryService<'a> {
  session: &'a Session,
}

impl<'a> GalleryService<'a> {
  pub fn new(session: &'a Session) -> Self {
    Self { session }
  }

  pub async fn list(&self) -> Result<CacheResult<Vec<GalleryImage>>> {
    let client = self.session.client();
    self
      .session
      .cache()
      .fetch(&GatewayQueryKey::Gallery, self.session.ttl(GALLERY), || async {
        Ok(client.request(ApiRequest::post("/gallery/getAll")).await?)
      })
      .await
  }

  pub async fn get(&self, id: i64) -> Result<GalleryImage> {
    let request = ApiRequest::get("/gallery/getById").query("id", id.to_string());
    Ok(self.session.client().request(request).await?)
  }

  pub async fn save(&self, request: &GallerySaveRequest) -> Result<GalleryImage> {
    info!("saving gallery image");
    let request = ApiRequest::post("/gallery/save").json(serde_json::to_value(request)?);
    let saved = self.session.client().request(request).await?;
    self.invalidate()?;
    Ok(saved)
  }

  pub async fn update(&self, request: &GalleryUpdateRequest) -> Result<GalleryImage> {
    info!(id = request.id, "updating gallery image");
    let request = ApiRequest::post("/gallery/update").json(serde_json::to_value(request)?);
    let updated = self.session.client().request(request).await?;
    self.invalidate()?;
    Ok(updated)
  }

  pub async fn delete(&self, id: i64) -> Result<Value> {
    info!(id, "deleting gallery image");
    let request = ApiRequest::post("/gallery/delete").json(json!({ "id": id }));
    let result = self.session.client().request(request).await?;
    self.invalidate()?;
    Ok(result)
  }

  fn invalidate(&self) -> Result<()> {
    self.session.cache().clear_namespace(GALLERY)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::gateway::testing::spawn_gateway;
  use crate::gateway::ApiError;
  use crate::session::testing::test_session;
  use axum::extract::Query;
  use axum::http::StatusCode;
  use axum::routing::{get, post};
  use axum::{Json, Router};
  use std::collections::HashMap;

  #[tokio::test]
  async fn test_list_and_get() {
    let app = Router::new()
      .route(
        "/gallery/getAll",
        post(|| async {
          Json(json!({"success": true, "code": 200, "message": "ok",
            "data": [{"id": 1, "imageBase64": "aGVsbG8="}]}))
        }),
      )
      .route(
        "/gallery/getById",
        get(|Query(params): Query<HashMap<String, String>>| async move {
          let id: i64 = params["id"].parse().unwrap();
          Json(json!({"success": true, "code": 200, "message": "ok",
            "data": {"id": id, "imageBase64": "aGVsbG8="}}))
        }),
      );
    let session = test_session(&spawn_gateway(app).await);
    let gallery = GalleryService::new(&session);

    let images = gallery.list().await.unwrap();
    assert_eq!(images.data.len(), 1);
    assert_eq!(gallery.list().await.unwrap().source, CacheSource::Cache);
    assert_eq!(gallery.get(7).await.unwrap().id, 7);
  }

  #[tokio::test]
  async fn test_failed_envelope_surfaces_message() {
    let app = Router::new().route(
      "/gallery/delete",
      post(|| async {
        (
          StatusCode::OK,
          Json(json!({"success": false, "code": 404, "message": "Image not found"})),
        )
      }),
    );
    let session = test_session(&spawn_gateway(app).await);

    let err = GalleryService::new(&session).delete(99).await.unwrap_err();
    let api = err.downcast_ref::<ApiError>().unwrap();
    assert_eq!(api.status(), 404);
    assert!(api.to_string().contains("Image not found"));
  }
}
