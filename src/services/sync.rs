//! Push the character list to the spreadsheet sync endpoint.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::gateway::ApiRequest;
use crate::session::Session;

/// What the sync endpoint said, wrapped with the number of characters sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
  pub success: bool,
  pub message: String,
  /// Raw reply text from the endpoint
  pub result: String,
  pub character_count: usize,
}

pub struct SyncService<'a> {
  session: &'a Session,
}

impl<'a> SyncService<'a> {
  pub fn new(session: &'a Session) -> Self {
    Self { session }
  }

  /// POST `characters` as a JSON array to the configured sync URL.
  pub async fn push(&self, characters: Vec<Value>) -> Result<SyncReport> {
    let sync = &self.session.config().sync;
    let url = sync
      .url
      .as_deref()
      .filter(|u| !u.trim().is_empty())
      .ok_or_else(|| eyre!("No `sync.url` in the configuration"))?;

    let count = characters.len();
    info!(count, "syncing characters");

    let mut request = ApiRequest::post(url)
      .json(Value::Array(characters))
      .without_auth();
    request.timeout = Some(Duration::from_secs(sync.timeout_secs));

    let raw = self
      .session
      .client()
      .forward(request)
      .await
      .map_err(|e| eyre!("Sync endpoint failed: {}", e))?;
    let result = String::from_utf8_lossy(&raw.bytes).into_owned();
    info!(count, "characters synced");

    Ok(SyncReport {
      success: true,
      message: "Sync succeeded".to_string(),
      result,
      character_count: count,
    })
  }
}
