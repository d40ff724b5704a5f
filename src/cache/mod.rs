//! Request/response cache for offline support.
//!
//! This module provides the storage half of the offline cache:
//! - Named partitions, created on first open and reused afterwards
//! - Atomic bulk population of a partition
//! - Lookup of a stored response by request (GET only, fragment ignored)

mod storage;
mod traits;

pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource};
