//! Typed facades over the gateway endpoints.

pub mod damage;
pub mod gallery;
pub mod people;
pub mod sync;
pub mod weapon;

pub use damage::DamageService;
pub use gallery::GalleryService;
pub use people::PeopleService;
pub use sync::SyncService;
pub use weapon::WeaponService;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::gateway::types::Submission;
use crate::gateway::{ApiError, ApiRequest, JobEndpoints, Poller};
use crate::session::Session;

/// Submit a request that the backend may queue and resolve it to `T`,
/// polling through `endpoints` when a job handle comes back.
pub(crate) async fn submit_and_wait<T: DeserializeOwned>(
  session: &Session,
  request: ApiRequest,
  poller: &Poller,
  endpoints: &JobEndpoints,
) -> Result<T, ApiError> {
  let operation = request.path.clone();
  match session.client().submit::<serde_json::Value>(request).await? {
    Submission::Completed(value) => Ok(serde_json::from_value(value)?),
    Submission::Accepted(job) => {
      info!(request_id = %job.request_id, %operation, "request queued");
      let data = poller.wait(session.client(), &job, endpoints).await?;
      Ok(serde_json::from_value(data)?)
    }
  }
}
