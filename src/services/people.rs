use color_eyre::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::cache::CacheResult;
use crate::gateway::cache::{GatewayQueryKey, PEOPLE};
use crate::gateway::types::Person;
use crate::gateway::ApiRequest;
use crate::session::Session;

use super::submit_and_wait;

/// People endpoints. Reads of the full list are cached; writes drop the
/// cached people data.
pub struct PeopleService<'a> {
  session: &'a Session,
}

impl<'a> PeopleService<'a> {
  pub fn new(session: &'a Session) -> Self {
    Self { session }
  }

  async fn call<T: serde::de::DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
    let session = self.session;
    Ok(submit_and_wait(session, request, &session.poller(), &session.job_endpoints()).await?)
  }

  /// All character names.
  pub async fn names(&self) -> Result<CacheResult<Vec<String>>> {
    self
      .session
      .cache()
      .fetch(&GatewayQueryKey::PeopleNames, self.session.ttl(PEOPLE), || async {
        self.call(ApiRequest::get("/people/names")).await
      })
      .await
  }

  /// All characters.
  pub async fn list(&self) -> Result<CacheResult<Vec<Person>>> {
    self
      .session
      .cache()
      .fetch(&GatewayQueryKey::People, self.session.ttl(PEOPLE), || async {
        self.call(ApiRequest::post("/people/get-all")).await
      })
      .await
  }

  /// Drop the cached list and fetch it again.
  pub async fn refresh(&self) -> Result<CacheResult<Vec<Person>>> {
    self.session.cache().clear_namespace(PEOPLE)?;
    self.list().await
  }

  /// Look a character up in the (cached) list.
  pub async fn find(&self, name: &str) -> Result<Option<Person>> {
    let people = self.list().await?;
    Ok(people.data.into_iter().find(|p| p.name == name))
  }

  pub async fn get_by_name(&self, name: &str) -> Result<Person> {
    self
      .call(ApiRequest::post("/people/get-by-name").json(json!({ "name": name })))
      .await
  }

  pub async fn insert(&self, person: &Person) -> Result<Person> {
    info!(name = %person.name, "inserting person");
    let request = ApiRequest::post("/people/insert").json(serde_json::to_value(person)?);
    let created = self.call(request).await?;
    self.invalidate()?;
    Ok(created)
  }

  pub async fn update(&self, person: &Person) -> Result<Person> {
    info!(name = %person.name, "updating person");
    let request = ApiRequest::post("/people/update").json(serde_json::to_value(person)?);
    let updated = self.call(request).await?;
    self.invalidate()?;
    Ok(updated)
  }

  pub async fn insert_many(&self, people: &[Person]) -> Result<Value> {
    info!(count = people.len(), "inserting people");
    let request = ApiRequest::post("/people/insert-multiple").json(serde_json::to_value(people)?);
    let result = self.call(request).await?;
    self.invalidate()?;
    Ok(result)
  }

  pub async fn delete_all(&self) -> Result<Value> {
    info!("deleting all people");
    let result = self.call(ApiRequest::post("/people/delete-all")).await?;
    self.invalidate()?;
    Ok(result)
  }

  fn invalidate(&self) -> Result<()> {
    self.session.cache().clear_namespace(PEOPLE)?;
    Ok(())
  }
}
