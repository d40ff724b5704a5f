use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
  #[error("Network error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Network unreachable: {0}")]
  Unreachable(String),
}
