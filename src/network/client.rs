use std::time::Duration;

use color_eyre::{eyre::eyre, Result};

use crate::config::NetworkConfig;

use super::error::NetworkError;
use super::types::{Request, Response};
use super::Network;

/// HTTP network backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await?;

    let url = response.url().clone();
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      url,
      status,
      headers,
      body,
    })
  }
}

/// Network that is never reachable. Every fetch fails, which forces the
/// cache fallback path.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    Err(NetworkError::Unreachable(format!(
      "offline, not fetching {}",
      request.url
    )))
  }
}
