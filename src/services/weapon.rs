use color_eyre::Result;
use serde_json::Value;
use tracing::info;

use crate::cache::CacheResult;
use crate::gateway::cache::{GatewayQueryKey, WEAPONS};
use crate::gateway::types::Weapon;
use crate::gateway::ApiRequest;
use crate::session::Session;

use super::submit_and_wait;

pub struct WeaponService<'a> {
  session: &'a Session,
}

impl<'a> WeaponService<'a> {
  pub fn new(session: &'a Session) -> Self {
    Self { session }
  }

  async fn call<T: serde::de::DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
    let session = self.session;
    Ok(submit_and_wait(session, request, &session.poller(), &session.job_endpoints()).await?)
  }

  pub async fn list(&self) -> Result<CacheResult<Vec<Weapon>>> {
    self
      .session
      .cache()
      .fetch(&GatewayQueryKey::Weapons, self.session.ttl(WEAPONS), || async {
        self.call(ApiRequest::get("/weapons")).await
      })
      .await
  }

  pub async fn get(&self, name: &str) -> Result<Weapon> {
    self.call(ApiRequest::get("/weapons").segment(name)).await
  }

  /// Weapons held by one character, cached per owner.
  pub async fn by_owner(&self, owner: &str) -> Result<CacheResult<Vec<Weapon>>> {
    let key = GatewayQueryKey::WeaponsByOwner {
      owner: owner.to_string(),
    };
    self
      .session
      .cache()
      .fetch(&key, self.session.ttl(WEAPONS), || async {
        self
          .call(ApiRequest::get("/weapons/owner").segment(owner))
          .await
      })
      .await
  }

  pub async fn save(&self, weapon: &Weapon) -> Result<Weapon> {
    info!(name = %weapon.name, owner = %weapon.owner, "saving weapon");
    let request = ApiRequest::post("/weapons").json(serde_json::to_value(weapon)?);
    let saved = self.call(request).await?;
    self.session.cache().clear_namespace(WEAPONS)?;
    Ok(saved)
  }

  pub async fn delete(&self, name: &str) -> Result<Value> {
    info!(name, "deleting weapon");
    let result = self.call(ApiRequest::delete("/weapons").segment(name)).await?;
    self.session.cache().clear_namespace(WEAPONS)?;
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::gateway::testing::spawn_gateway;
  use crate::session::testing::test_session;
  use axum::extract::Path;
  use axum::routing::get;
  use axum::{Json, Router};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn envelope(data: Value) -> Json<Value> {
    Json(json!({"success": true, "code": 200, "message": "ok", "data": data}))
  }

  #[tokio::test]
  async fn test_by_owner_is_cached_per_owner() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
      "/weapons/owner/{owner}",
      get(move |Path(owner): Path<String>| {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          envelope(json!([{"name": format!("{} blade", owner), "owner": owner, "baseDamage": 10}]))
        }
      }),
    );
    let session = test_session(&spawn_gateway(app).await);
    let weapons = WeaponService::new(&session);

    let first = weapons.by_owner("Sir Galahad").await.unwrap();
    assert_eq!(first.data[0].owner, "Sir Galahad");
    let second = weapons.by_owner("Sir Galahad").await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    weapons.by_owner("Mage").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_delete_invalidates_list() {
    let lists = Arc::new(AtomicUsize::new(0));
    let counter = lists.clone();
    let app = Router::new()
      .route(
        "/weapons",
        get(move || {
          let counter = counter.clone();
          async move {
            counter.fetch_add(1, Ordering::SeqCst);
            envelope(json!([{"name": "Excalibur", "owner": "Arthur"}]))
          }
        }),
      )
      .route(
        "/weapons/{name}",
        get(|Path(name): Path<String>| async move { envelope(json!({"name": name})) })
          .delete(|| async { envelope(json!(null)) }),
      );
    let session = test_session(&spawn_gateway(app).await);
    let weapons = WeaponService::new(&session);

    weapons.list().await.unwrap();
    assert_eq!(weapons.get("Excalibur").await.unwrap().name, "Excalibur");
    assert_eq!(weapons.delete("Excalibur").await.unwrap(), Value::Null);
    weapons.list().await.unwrap();
    assert_eq!(lists.load(Ordering::SeqCst), 2);
  }
}
