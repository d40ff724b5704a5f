//! Offline cache controller: turns host install/fetch events into cache
//! operations.

use color_eyre::Result;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheKey, CacheResult, CacheStorage};
use crate::config::Config;
use crate::network::{Network, NetworkError, Request, Response};

#[derive(Error, Debug)]
pub enum InstallError {
  #[error("Duplicate asset in cache list: {0}")]
  DuplicateAsset(String),

  #[error("Failed to fetch asset {url}: {source}")]
  AssetFetch {
    url: String,
    #[source]
    source: NetworkError,
  },

  #[error("Asset {url} returned status {status}")]
  BadStatus { url: String, status: u16 },

  #[error("Cache storage error: {0}")]
  Storage(color_eyre::Report),
}

#[derive(Error, Debug)]
pub enum FetchError {
  /// Network failed and nothing was cached for the request.
  #[error("No cached response for {url} after network failure: {reason}")]
  Miss { url: String, reason: NetworkError },

  #[error("Cache storage error: {0}")]
  Storage(color_eyre::Report),
}

/// Outcome of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cache_name: String,
  /// Number of entries written
  pub cached: usize,
}

/// Result of the network leg of a fetch event.
#[derive(Debug)]
pub enum NetworkOutcome {
  Success(Response),
  Failure(NetworkError),
}

impl From<Result<Response, NetworkError>> for NetworkOutcome {
  fn from(result: Result<Response, NetworkError>) -> Self {
    match result {
      Ok(response) => Self::Success(response),
      Err(reason) => Self::Failure(reason),
    }
  }
}

/// Network-first cache controller.
///
/// Install fills the named partition with every configured asset. Fetch
/// always tries the network and only consults the partition when the network
/// fails. Successful network responses are never written back.
pub struct OfflineCacheController<S: CacheStorage, N: Network> {
  cache_name: String,
  assets: Vec<Url>,
  storage: Arc<S>,
  network: N,
}

impl<S: CacheStorage, N: Network> OfflineCacheController<S, N> {
  pub fn new(cache_name: impl Into<String>, assets: Vec<Url>, storage: Arc<S>, network: N) -> Self {
    Self {
      cache_name: cache_name.into(),
      assets,
      storage,
      network,
    }
  }

  /// Build a controller from configuration, resolving asset locators against
  /// the configured origin.
  pub fn from_config(config: &Config, storage: Arc<S>, network: N) -> Result<Self> {
    Ok(Self::new(
      config.cache.name.clone(),
      config.asset_urls()?,
      storage,
      network,
    ))
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn assets(&self) -> &[Url] {
    &self.assets
  }

  /// Handle the install event.
  ///
  /// 1. Open (or create) the partition
  /// 2. Fetch every asset; any failure or non-2xx status aborts
  /// 3. Store all responses in one transaction
  pub async fn handle_install(&self) -> Result<InstallReport, InstallError> {
    let requests = self.asset_requests()?;

    let partition = self
      .storage
      .open(&self.cache_name)
      .map_err(InstallError::Storage)?;
    info!(cache = %self.cache_name, "Opened cache");

    let responses = match try_join_all(requests.iter().map(|r| self.fetch_asset(r))).await {
      Ok(responses) => responses,
      Err(e) => {
        warn!(cache = %self.cache_name, error = %e, "Install failed");
        return Err(e);
      }
    };

    let entries: Vec<(Request, Response)> = requests.into_iter().zip(responses).collect();
    self
      .storage
      .put_all(&partition, &entries)
      .map_err(InstallError::Storage)?;

    info!(cache = %self.cache_name, cached = entries.len(), "Install complete");

    Ok(InstallReport {
      cache_name: self.cache_name.clone(),
      cached: entries.len(),
    })
  }

  /// Handle a fetch event with a network-first strategy.
  ///
  /// 1. Try the network; any response it produces is returned as-is
  /// 2. On network failure, return the cached response for the request
  /// 3. If nothing is cached, report a miss
  ///
  /// The fallback only reads this controller's partition; entries left in
  /// other (older) partitions are never served.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    match NetworkOutcome::from(self.network.fetch(request).await) {
      NetworkOutcome::Success(response) => Ok(CacheResult::from_network(response)),
      NetworkOutcome::Failure(reason) => {
        match self
          .storage
          .match_request(&self.cache_name, request)
          .map_err(FetchError::Storage)?
        {
          Some(entry) => Ok(CacheResult::offline(entry.response, entry.cached_at)),
          None => Err(FetchError::Miss {
            url: request.url.to_string(),
            reason,
          }),
        }
      }
    }
  }

  /// Build the GET requests for the asset list, rejecting duplicates.
  fn asset_requests(&self) -> Result<Vec<Request>, InstallError> {
    let mut seen = HashSet::new();
    let mut requests = Vec::with_capacity(self.assets.len());

    for url in &self.assets {
      let request = Request::get(url.clone());
      if !seen.insert(request.cache_hash()) {
        return Err(InstallError::DuplicateAsset(request.description()));
      }
      requests.push(request);
    }

    Ok(requests)
  }

  async fn fetch_asset(&self, request: &Request) -> Result<Response, InstallError> {
    let response = self
      .network
      .fetch(request)
      .await
      .map_err(|source| InstallError::AssetFetch {
        url: request.url.to_string(),
        source,
      })?;

    if !response.is_ok() {
      return Err(InstallError::BadStatus {
        url: request.url.to_string(),
        status: response.status,
      });
    }

    Ok(response)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use reqwest::Method;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  const ORIGIN: &str = "http://localhost:8888";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn response(path: &str, status: u16, body: &[u8]) -> Response {
    Response {
      url: url(path),
      status,
      headers: vec![("content-type".to_string(), b"text/plain".to_vec())],
      body: body.to_vec(),
    }
  }

  /// In-process network serving canned responses. Unknown URLs fail at the
  /// transport level, and the whole network can be switched off.
  #[derive(Default)]
  struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
  }

  impl FakeNetwork {
    fn serve(&self, path: &str, status: u16, body: &[u8]) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url(path).to_string(), response(path, status, body));
    }

    fn go_offline(&self) {
      self.offline.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl Network for Arc<FakeNetwork> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(NetworkError::Unreachable("offline".to_string()));
      }
      self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| NetworkError::Unreachable(format!("no route to {}", request.url)))
    }
  }

  fn controller(
    assets: &[&str],
  ) -> (
    OfflineCacheController<SqliteStorage, Arc<FakeNetwork>>,
    Arc<SqliteStorage>,
    Arc<FakeNetwork>,
  ) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::default());
    let controller = OfflineCacheController::new(
      "studio-v1",
      assets.iter().map(|p| url(p)).collect(),
      Arc::clone(&storage),
      Arc::clone(&network),
    );
    (controller, storage, network)
  }

  #[tokio::test]
  async fn test_install_populates_every_asset() {
    let (controller, storage, network) = controller(&["/", "/manifest.json", "/icons/a.png"]);
    network.serve("/", 200, b"<html>");
    network.serve("/manifest.json", 200, b"{}");
    network.serve("/icons/a.png", 200, b"\x89PNG");

    let report = controller.handle_install().await.unwrap();
    assert_eq!(report.cache_name, "studio-v1");
    assert_eq!(report.cached, 3);
    assert!(storage.is_installed("studio-v1").unwrap());

    for path in ["/", "/manifest.json", "/icons/a.png"] {
      let entry = storage
        .match_request("studio-v1", &Request::get(url(path)))
        .unwrap();
      assert!(entry.is_some(), "{} should be cached", path);
    }
  }

  #[tokio::test]
  async fn test_install_fails_when_any_asset_is_unfetchable() {
    let (controller, storage, network) = controller(&["/", "/manifest.json"]);
    network.serve("/", 200, b"<html>");

    let err = controller.handle_install().await.unwrap_err();
    assert!(matches!(err, InstallError::AssetFetch { ref url, .. } if url.ends_with("/manifest.json")));

    assert!(!storage.is_installed("studio-v1").unwrap());
    assert!(storage
      .match_request("studio-v1", &Request::get(url("/")))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let (controller, storage, network) = controller(&["/", "/manifest.json"]);
    network.serve("/", 200, b"<html>");
    network.serve("/manifest.json", 404, b"not found");

    let err = controller.handle_install().await.unwrap_err();
    assert!(matches!(err, InstallError::BadStatus { status: 404, .. }));
    assert!(!storage.is_installed("studio-v1").unwrap());
    assert_eq!(storage.partitions().unwrap()[0].entries, 0);
  }

  #[tokio::test]
  async fn test_install_rejects_duplicate_assets_before_fetching() {
    let (controller, storage, network) = controller(&["/manifest.json", "/manifest.json#x"]);
    network.serve("/manifest.json", 200, b"{}");

    let err = controller.handle_install().await.unwrap_err();
    assert!(matches!(err, InstallError::DuplicateAsset(_)));
    assert_eq!(network.calls(), 0);
    assert!(storage.partitions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_with_no_assets_succeeds() {
    let (controller, storage, _network) = controller(&[]);

    let report = controller.handle_install().await.unwrap();
    assert_eq!(report.cached, 0);
    assert!(storage.is_installed("studio-v1").unwrap());
  }

  #[tokio::test]
  async fn test_repeated_install_reuses_partition() {
    let (controller, storage, network) = controller(&["/"]);
    network.serve("/", 200, b"v1");
    controller.handle_install().await.unwrap();

    network.serve("/", 200, b"v2");
    controller.handle_install().await.unwrap();

    let partitions = storage.partitions().unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].entries, 1);

    let entry = storage
      .match_request("studio-v1", &Request::get(url("/")))
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.body, b"v2");
  }

  #[tokio::test]
  async fn test_fetch_prefers_network_over_cache() {
    let (controller, _storage, network) = controller(&["/manifest.json"]);
    network.serve("/manifest.json", 200, b"cached");
    controller.handle_install().await.unwrap();

    network.serve("/manifest.json", 200, b"live");
    let result = controller
      .handle_fetch(&Request::get(url("/manifest.json")))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"live");
    assert!(result.cached_at.is_none());
  }

  #[tokio::test]
  async fn test_fetch_returns_network_error_status_as_is() {
    let (controller, _storage, network) = controller(&["/"]);
    network.serve("/", 200, b"<html>");
    controller.handle_install().await.unwrap();

    network.serve("/", 503, b"maintenance");
    let result = controller
      .handle_fetch(&Request::get(url("/")))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.status, 503);
  }

  #[tokio::test]
  async fn test_fetch_does_not_write_cache() {
    let (controller, storage, network) = controller(&[]);
    network.serve("/app.js", 200, b"console.log(1)");

    controller
      .handle_fetch(&Request::get(url("/app.js")))
      .await
      .unwrap();

    assert!(storage
      .match_request("studio-v1", &Request::get(url("/app.js")))
      .unwrap()
      .is_none());

    network.go_offline();
    let err = controller
      .handle_fetch(&Request::get(url("/app.js")))
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Miss { .. }));
  }

  #[tokio::test]
  async fn test_fetch_falls_back_to_cache_when_offline() {
    let (controller, _storage, network) = controller(&["/manifest.json"]);
    network.serve("/manifest.json", 200, br#"{"name":"Mihomo Studio"}"#);
    controller.handle_install().await.unwrap();

    network.go_offline();
    let result = controller
      .handle_fetch(&Request::get(url("/manifest.json")))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(
      result.data,
      response("/manifest.json", 200, br#"{"name":"Mihomo Studio"}"#)
    );
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_fetch_miss_is_explicit_error() {
    let (controller, _storage, network) = controller(&["/"]);
    network.serve("/", 200, b"<html>");
    controller.handle_install().await.unwrap();

    network.go_offline();
    let err = controller
      .handle_fetch(&Request::get(url("/unknown.png")))
      .await
      .unwrap_err();

    match err {
      FetchError::Miss { url, reason } => {
        assert!(url.ends_with("/unknown.png"));
        assert!(matches!(reason, NetworkError::Unreachable(_)));
      }
      other => panic!("expected miss, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_fetch_non_get_never_uses_cache() {
    let (controller, _storage, network) = controller(&["/"]);
    network.serve("/", 200, b"<html>");
    controller.handle_install().await.unwrap();

    network.go_offline();
    let post = Request::new(Method::POST, url("/"));
    let err = controller.handle_fetch(&post).await.unwrap_err();
    assert!(matches!(err, FetchError::Miss { .. }));
  }

  #[tokio::test]
  async fn test_fetch_reads_only_own_partition() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::default());
    network.serve("/", 200, b"old version");

    let v1 = OfflineCacheController::new(
      "studio-v1",
      vec![url("/")],
      Arc::clone(&storage),
      Arc::clone(&network),
    );
    v1.handle_install().await.unwrap();

    let v2 = OfflineCacheController::new("studio-v2", vec![url("/")], storage, Arc::clone(&network));
    network.go_offline();

    assert!(v1.handle_fetch(&Request::get(url("/"))).await.is_ok());
    assert!(matches!(
      v2.handle_fetch(&Request::get(url("/"))).await,
      Err(FetchError::Miss { .. })
    ));
  }

  #[tokio::test]
  async fn test_offline_scenario() {
    let (controller, _storage, network) = controller(&["/", "/manifest.json"]);
    network.serve("/", 200, b"<!doctype html><title>Mihomo Studio</title>");
    network.serve("/manifest.json", 200, br#"{"short_name":"Studio"}"#);

    let report = controller.handle_install().await.unwrap();
    assert_eq!(report.cached, 2);

    network.go_offline();

    let manifest = controller
      .handle_fetch(&Request::get(url("/manifest.json")))
      .await
      .unwrap();
    assert_eq!(manifest.source, CacheSource::Offline);
    assert_eq!(manifest.data.body, br#"{"short_name":"Studio"}"#);

    let unknown = controller
      .handle_fetch(&Request::get(url("/unknown.png")))
      .await;
    assert!(matches!(unknown, Err(FetchError::Miss { .. })));
  }

  #[test]
  fn test_from_config_resolves_assets() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let controller =
      OfflineCacheController::from_config(&Config::default(), storage, Arc::new(FakeNetwork::default()))
        .unwrap();

    assert_eq!(controller.cache_name(), "mihomo-studio-cache-v1");
    assert_eq!(controller.assets().len(), 4);
    assert_eq!(controller.assets()[1].as_str(), "http://localhost:8888/manifest.json");
  }
}
