//! Network side of the offline cache: request/response descriptors and the
//! fetch primitive the controller calls into.

mod client;
mod error;
mod types;

use std::future::Future;

pub use client::{HttpNetwork, OfflineNetwork};
pub use error::NetworkError;
pub use types::{Request, Response};

/// Network-fetch primitive provided by the host.
///
/// `Err` means a transport-level failure (DNS, refused connection, timeout,
/// abort). An HTTP error status is still a successful fetch.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, NetworkError>> + Send;
}
