//! Object store abstraction: flat string keys mapped to byte blobs.
//!
//! The job only ever needs three capabilities from a bucket: list keys under a
//! prefix, fetch an object, and overwrite an object. Backends:
//! - [`LocalStore`]: a directory on disk treated as a bucket
//! - [`InMemoryStore`]: process-local map, used by tests and dry runs
//! - `S3Store`: S3-compatible endpoint (behind the `s3` feature)

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalStore;
pub use memory::InMemoryStore;
#[cfg(feature = "s3")]
pub use s3::{S3Settings, S3Store};

use thiserror::Error;

/// Errors raised by object store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such key: {key}")]
    NotFound { key: String },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store backend error: {0}")]
    Backend(String),
}

/// A bucket-like key/value store.
///
/// Calls are blocking. A missing key on `get` must surface as
/// [`StoreError::NotFound`] so callers can branch on "first run".
pub trait ObjectStore: Send + Sync {
    /// Human-readable location of the bucket, used in log lines.
    fn describe(&self) -> String;

    /// All keys starting with `prefix`, sorted ascending. Empty when nothing matches.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch the full body of an object.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or overwrite an object.
    fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError>;
}
