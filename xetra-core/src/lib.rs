//! Xetra Core: storage access, watermark resolution, meta file and report transform.
//!
//! This crate holds everything the daily report job needs below the run loop:
//! - Object store abstraction with local-directory, in-memory and S3 backends
//! - Table codec (CSV and Parquet) on top of any object store
//! - Watermark arithmetic deciding which source dates still need processing
//! - Meta file reading and merging
//! - Report 1 aggregation (daily open/close/min/max/volume and change)

pub mod config;
pub mod domain;
pub mod meta;
pub mod store;
pub mod table;
pub mod transform;
pub mod watermark;

pub use config::{ConfigError, SourceConfig, TargetConfig};
pub use domain::{MetaRecord, RawRecord, ReportRecord};
pub use meta::{MetaError, MetaUpdate};
pub use store::{InMemoryStore, LocalStore, ObjectStore, StoreError};
pub use table::{TableError, TableFormat, TableStore, TextEncoding, WriteOutcome};
pub use transform::TransformError;
pub use watermark::DateResolution;
