//! Client for the gateway REST API: request helper, envelope decoding,
//! job polling and retry.

pub mod cache;
pub mod client;
pub mod envelope;
pub mod error;
pub mod poller;
pub mod retry;
pub mod types;

pub use client::{ApiClient, ApiRequest};
pub use error::ApiError;
pub use poller::{JobEndpoints, PollConfig, Poller};

#[cfg(test)]
pub mod testing {
  //! In-process fake gateway for tests.

  use std::sync::Arc;

  use crate::auth::TokenStore;
  use crate::cache::MemoryStorage;
  use crate::config::GatewayConfig;

  use super::ApiClient;

  /// Serve `app` on an ephemeral local port and return its base URL.
  pub async fn spawn_gateway(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
  }

  pub fn test_client(base_url: &str) -> ApiClient {
    let config = GatewayConfig {
      url: base_url.to_string(),
      ..GatewayConfig::default()
    };
    ApiClient::new(&config, TokenStore::new(Arc::new(MemoryStorage::new()), None)).unwrap()
  }
}
