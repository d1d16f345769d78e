//! Xetra Runner: job configuration and the daily report orchestrator.
//!
//! This crate builds on `xetra-core` to provide:
//! - The TOML job file (stores, source and target columns, meta key)
//! - Store connection from the job file (local directory or S3)
//! - [`XetraEtl`], which resolves the pending dates and runs extract, transform
//!   and load for report 1

pub mod config;
pub mod etl;

pub use config::{ConfigError, JobConfig, LoggingConfig, MetaConfig, StoreConfig};
pub use etl::{EtlError, RunPlan, RunSummary, Stage, XetraEtl};
