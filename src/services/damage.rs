//! Character damage: computed by the backend (possibly as a queued job),
//! cached per character, with a local estimate when the gateway is
//! unreachable.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::gateway::cache::{GatewayQueryKey, DAMAGE};
use crate::gateway::retry::with_retry;
use crate::gateway::types::{Person, Submission, Weapon};
use crate::gateway::{ApiError, ApiRequest};
use crate::session::Session;

use super::{PeopleService, WeaponService};

/// Where a damage value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageSource {
  Gateway,
  Cache,
  /// Local weapon formula; never cached
  Local,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamageReport {
  pub name: String,
  pub damage: i64,
  pub source: DamageSource,
}

/// Result of the local weapon formula.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponDamage {
  pub total_damage: i64,
  pub base_damage_applied: i64,
  pub bonus_damage_applied: i64,
  pub has_bonus: bool,
  pub state_attributes: Vec<String>,
}

fn ceil_div(n: i64, d: i64) -> i64 {
  -(-n).div_euclid(d)
}

/// Damage a character deals with the given weapons.
///
/// A weapon deals full damage when the character's utility power reaches a
/// third of the weapon's total damage, or magic power reaches half of it;
/// otherwise a tenth. Bonus damage only applies when the character's
/// attribute is one of the weapon's bonus attributes.
pub fn calculate_weapon_damage(person: &Person, weapons: &[Weapon]) -> WeaponDamage {
  let utility = person.utility_power.unwrap_or(0);
  let magic = person.magic_power.unwrap_or(0);
  let mut result = WeaponDamage::default();

  for weapon in weapons {
    let total = weapon.base_damage + weapon.bonus_damage;
    let qualified = utility >= ceil_div(total, 3) || magic >= ceil_div(total, 2);
    let bonus = person
      .attributes
      .as_ref()
      .map(|attr| weapon.bonus_attributes.contains(attr))
      .unwrap_or(false);

    let (base, extra) = if qualified {
      (weapon.base_damage, weapon.bonus_damage)
    } else {
      (weapon.base_damage.div_euclid(10), weapon.bonus_damage.div_euclid(10))
    };

    result.base_damage_applied += base;
    if bonus {
      result.bonus_damage_applied += extra;
      result.has_bonus = true;
    }
    result
      .state_attributes
      .extend(weapon.state_attributes.iter().cloned());
  }

  result.total_damage = result.base_damage_applied + result.bonus_damage_applied;
  result
}

/// Leading integer of a string, the way a lenient number parser reads it
/// ("120 dmg" -> 120).
fn leading_int(s: &str) -> Option<i64> {
  let s = s.trim_start();
  let digits_start = usize::from(s.starts_with('-') || s.starts_with('+'));
  let end = s[digits_start..]
    .find(|c: char| !c.is_ascii_digit())
    .map(|i| i + digits_start)
    .unwrap_or(s.len());
  s[..end].parse().ok()
}

/// Extract a damage number from the shapes the backend has been seen to
/// return.
pub fn parse_damage(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
    Value::String(s) => leading_int(s),
    Value::Object(map) => ["data", "damage", "value", "result", "totalDamage"]
      .iter()
      .filter_map(|field| map.get(*field))
      .find_map(parse_damage),
    _ => None,
  }
}

pub struct DamageService<'a> {
  session: &'a Session,
}

impl<'a> DamageService<'a> {
  pub fn new(session: &'a Session) -> Self {
    Self { session }
  }

  fn key(name: &str) -> GatewayQueryKey {
    GatewayQueryKey::Damage {
      name: name.to_string(),
    }
  }

  /// Damage for one character: cache first, then the gateway, then the
  /// local formula when the gateway cannot answer.
  pub async fn character_damage(&self, name: &str) -> Result<DamageReport> {
    let key = Self::key(name);
    let cache = self.session.cache();

    if let Some(hit) = cache.lookup::<_, i64>(&key)? {
      return Ok(DamageReport {
        name: name.to_string(),
        damage: hit.data,
        source: DamageSource::Cache,
      });
    }

    match self.fetch_remote(name).await {
      Ok(damage) => {
        cache.store(&key, &damage, self.session.ttl(DAMAGE))?;
        info!(name, damage, "damage calculated");
        Ok(DamageReport {
          name: name.to_string(),
          damage,
          source: DamageSource::Gateway,
        })
      }
      Err(e) if e.is_retryable() => {
        warn!(name, error = %e, "damage endpoint unavailable, using local formula");
        let damage = self.local_damage(name).await?;
        Ok(DamageReport {
          name: name.to_string(),
          damage: damage.total_damage,
          source: DamageSource::Local,
        })
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Damage for several characters, polled concurrently.
  pub async fn many(&self, names: &[String]) -> Vec<(String, Result<DamageReport>)> {
    let results = join_all(names.iter().map(|name| self.character_damage(name))).await;
    names.iter().cloned().zip(results).collect()
  }

  /// Drop the cached value and ask the gateway again.
  pub async fn refresh(&self, name: &str) -> Result<DamageReport> {
    self.session.cache().invalidate(&Self::key(name))?;
    self.character_damage(name).await
  }

  /// Forget cached damage for one character, or for all of them.
  pub fn clear(&self, name: Option<&str>) -> Result<usize> {
    match name {
      Some(name) => Ok(usize::from(self.session.cache().invalidate(&Self::key(name))?)),
      None => self.session.cache().clear_namespace(DAMAGE),
    }
  }

  async fn fetch_remote(&self, name: &str) -> Result<i64, ApiError> {
    let client = self.session.client();
    let request = ApiRequest::get("/people/damageWithWeapon")
      .query("name", name)
      .queued_on_request_id();

    let submission = with_retry(self.session.retry_policy(), "damageWithWeapon", || {
      client.submit::<Value>(request.clone())
    })
    .await?;

    let value = match submission {
      Submission::Completed(value) => value,
      Submission::Accepted(job) => {
        info!(name, request_id = %job.request_id, "damage calculation queued");
        self
          .session
          .damage_poller()
          .wait(client, &job, &self.session.damage_endpoints())
          .await?
      }
    };

    parse_damage(&value)
      .ok_or_else(|| ApiError::Decode(format!("unrecognized damage value: {}", value)))
  }

  async fn local_damage(&self, name: &str) -> Result<WeaponDamage> {
    let person = PeopleService::new(self.session)
      .find(name)
      .await
      .map_err(|e| eyre!("Cannot estimate damage for {}: {}", name, e))?
      .ok_or_else(|| eyre!("Character not found: {}", name))?;
    let weapons = WeaponService::new(self.session)
      .by_owner(name)
      .await
      .map_err(|e| eyre!("Cannot load weapons for {}: {}", name, e))?;

    Ok(calculate_weapon_damage(&person, &weapons.data))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::testing::spawn_gateway;
  use crate::session::testing::test_session;
  use axum::extract::Query;
  use axum::http::StatusCode;
  use axum::routing::{get, post};
  use axum::{Json, Router};
  use serde_json::json;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn weapon(base: i64, bonus: i64, bonus_attrs: &[&str]) -> Weapon {
    Weapon {
      name: "Blade".into(),
      base_damage: base,
      bonus_damage: bonus,
      bonus_attributes: bonus_attrs.iter().map(|s| s.to_string()).collect(),
      state_attributes: vec!["burn".into()],
      ..Weapon::default()
    }
  }

  fn person(utility: i64, magic: i64, attributes: &str) -> Person {
    Person {
      name: "Warrior".into(),
      utility_power: Some(utility),
      magic_power: Some(magic),
      attributes: Some(attributes.into()),
      ..Person::default()
    }
  }

  #[test]
  fn test_formula_full_damage_with_bonus() {
    // total 50: utility needs 17, magic needs 25
    let result = calculate_weapon_damage(&person(17, 0, "Fire"), &[weapon(30, 20, &["Fire"])]);
    assert_eq!(result.total_damage, 50);
    assert_eq!(result.base_damage_applied, 30);
    assert_eq!(result.bonus_damage_applied, 20);
    assert!(result.has_bonus);
    assert_eq!(result.state_attributes, vec!["burn".to_string()]);
  }

  #[test]
  fn test_formula_reduced_damage() {
    let result = calculate_weapon_damage(&person(16, 24, "Fire"), &[weapon(35, 20, &["Fire"])]);
    assert_eq!(result.base_damage_applied, 3);
    assert_eq!(result.bonus_damage_applied, 2);
    assert_eq!(result.total_damage, 5);
  }

  #[test]
  fn test_formula_without_matching_attribute() {
    let weapons = [weapon(30, 20, &["Ice"]), weapon(10, 0, &[])];
    let result = calculate_weapon_damage(&person(100, 0, "Fire"), &weapons);
    assert_eq!(result.total_damage, 40);
    assert!(!result.has_bonus);
    assert_eq!(result.state_attributes.len(), 2);
  }

  #[test]
  fn test_formula_no_weapons() {
    assert_eq!(
      calculate_weapon_damage(&person(1, 1, "Fire"), &[]),
      WeaponDamage::default()
    );
  }

  #[test]
  fn test_parse_damage_shapes() {
    assert_eq!(parse_damage(&json!(120)), Some(120));
    assert_eq!(parse_damage(&json!(99.7)), Some(99));
    assert_eq!(parse_damage(&json!("  85 points")), Some(85));
    assert_eq!(parse_damage(&json!({"totalDamage": "42"})), Some(42));
    assert_eq!(parse_damage(&json!({"data": {"damage": 7}})), Some(7));
    assert_eq!(parse_damage(&json!({"unknown": 1})), None);
    assert_eq!(parse_damage(&json!("n/a")), None);
  }

  #[tokio::test]
  async fn test_queued_damage_is_polled_and_cached() {
    let submits = Arc::new(AtomicUsize::new(0));
    let counter = submits.clone();
    let app = Router::new()
      .route(
        "/people/damageWithWeapon",
        get(move |Query(params): Query<HashMap<String, String>>| {
          let counter = counter.clone();
          async move {
            assert_eq!(params["name"], "Warrior");
            counter.fetch_add(1, Ordering::SeqCst);
            (
              StatusCode::ACCEPTED,
              Json(json!({"success": true, "code": 202, "message": "queued", "requestId": "dmg-1"})),
            )
          }
        }),
      )
      .route(
        "/api/request-status/{id}/exists",
        get(|| async { Json(json!(true)) }),
      )
      .route(
        "/api/request-status/{id}",
        get(|| async { Json(json!({"requestId": "dmg-1", "status": "COMPLETED", "data": 150})) })
          .delete(|| async { StatusCode::OK }),
      );
    let session = test_session(&spawn_gateway(app).await);
    let damage = DamageService::new(&session);

    let first = damage.character_damage("Warrior").await.unwrap();
    assert_eq!((first.damage, first.source), (150, DamageSource::Gateway));

    let second = damage.character_damage("Warrior").await.unwrap();
    assert_eq!((second.damage, second.source), (150, DamageSource::Cache));
    assert_eq!(submits.load(Ordering::SeqCst), 1);

    assert_eq!(damage.clear(Some("Warrior")).unwrap(), 1);
    damage.refresh("Warrior").await.unwrap();
    assert_eq!(submits.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_bare_request_id_with_200_is_polled() {
    let checks = Arc::new(AtomicUsize::new(0));
    let counter = checks.clone();
    let app = Router::new()
      .route(
        "/people/damageWithWeapon",
        get(|| async { Json(json!({"requestId": "dmg-9"})) }),
      )
      .route(
        "/api/request-status/{id}/exists",
        get(move || {
          let counter = counter.clone();
          async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Json(json!(true))
          }
        }),
      )
      .route(
        "/api/request-status/{id}",
        get(|| async { Json(json!(150)) }).delete(|| async { StatusCode::OK }),
      );
    let session = test_session(&spawn_gateway(app).await);

    let report = DamageService::new(&session)
      .character_damage("Warrior")
      .await
      .unwrap();
    assert_eq!((report.damage, report.source), (150, DamageSource::Gateway));
    assert_eq!(checks.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unavailable_gateway_falls_back_to_formula() {
    let app = Router::new()
      .route(
        "/people/damageWithWeapon",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
      )
      .route(
        "/people/get-all",
        post(|| async {
          Json(json!({"success": true, "code": 200, "message": "ok",
            "data": [{"name": "Warrior", "utilityPower": 10, "attributes": "Fire"}]}))
        }),
      )
      .route(
        "/weapons/owner/{owner}",
        get(|| async {
          Json(json!({"success": true, "code": 200, "message": "ok", "data": [
            {"name": "Flame Sword", "owner": "Warrior", "baseDamage": 30, "bonusDamage": 20,
             "bonusAttributes": ["Fire"], "stateAttributes": ["burn"]}
          ]}))
        }),
      );
    let session = test_session(&spawn_gateway(app).await);
    let damage = DamageService::new(&session);

    let report = damage.character_damage("Warrior").await.unwrap();
    assert_eq!(report.damage, 5);
    assert_eq!(report.source, DamageSource::Local);
    assert!(session
      .cache()
      .lookup::<_, i64>(&DamageService::key("Warrior"))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_many_runs_each_name() {
    let app = Router::new().route(
      "/people/damageWithWeapon",
      get(|Query(params): Query<HashMap<String, String>>| async move {
        let damage = params["name"].len() as i64 * 10;
        Json(json!({"success": true, "code": 200, "message": "ok", "data": damage}))
      }),
    );
    let session = test_session(&spawn_gateway(app).await);

    let names = vec!["Mage".to_string(), "Warrior".to_string()];
    let results = DamageService::new(&session).many(&names).await;
    assert_eq!(results[0].0, "Mage");
    assert_eq!(results[0].1.as_ref().unwrap().damage, 40);
    assert_eq!(results[1].1.as_ref().unwrap().damage, 70);
  }

  #[tokio::test]
  async fn test_client_errors_do_not_fall_back() {
    let app = Router::new().route(
      "/people/damageWithWeapon",
      get(|| async {
        Json(json!({"success": false, "code": 400, "message": "Character not found"}))
      }),
    );
    let session = test_session(&spawn_gateway(app).await);

    let err = DamageService::new(&session)
      .character_damage("Nobody")
      .await
      .unwrap_err();
    assert_eq!(err.downcast_ref::<ApiError>().unwrap().status(), 400);
  }
}
