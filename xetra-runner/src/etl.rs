//! Xetra daily report job: resolve, extract, transform, load.
//!
//! [`XetraEtl`] resolves the date list once, at construction, from the meta
//! file in the target bucket. The stages can then be run one by one or all at
//! once with [`XetraEtl::etl_report1`].
//!
//! Failure handling: a failed stage aborts the run and nothing after it
//! happens. In particular the meta file is only touched after the report is
//! written, so a failed run is retried in full on the next invocation.

use chrono::{Local, NaiveDate, NaiveDateTime};
use polars::prelude::DataFrame;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use xetra_core::config::{SourceConfig, TargetConfig};
use xetra_core::meta::{self, MetaError, MetaUpdate};
use xetra_core::table::{concat_frames, TableError, TableStore, WriteOutcome};
use xetra_core::transform::{self, TransformError};
use xetra_core::watermark::{format_date, DateResolution};

use crate::config::{ConfigError, JobConfig};

/// Pipeline stage, attached to every run error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("resolving dates from the meta file failed: {0}")]
    Resolve(#[source] MetaError),

    #[error("extracting source files failed: {0}")]
    Extract(#[source] TableError),

    #[error("transforming source data failed: {0}")]
    Transform(#[from] TransformError),

    #[error("writing the report failed: {0}")]
    Load(#[source] TableError),

    #[error("updating the meta file failed: {0}")]
    MetaUpdate(#[source] MetaError),
}

impl EtlError {
    /// The stage that failed; configuration errors count as resolve.
    pub fn stage(&self) -> Stage {
        match self {
            EtlError::Config(_) | EtlError::Resolve(_) => Stage::Resolve,
            EtlError::Extract(_) => Stage::Extract,
            EtlError::Transform(_) => Stage::Transform,
            EtlError::Load(_) | EtlError::MetaUpdate(_) => Stage::Load,
        }
    }
}

/// What a run would do, without touching the source bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPlan {
    pub first_extract_date: NaiveDate,
    pub today: NaiveDate,
    pub min_date: NaiveDate,
    pub extract_dates: Vec<NaiveDate>,
    pub lookback_date: Option<NaiveDate>,
    pub dates_to_record: Vec<NaiveDate>,
    pub report_key: String,
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub min_date: NaiveDate,
    pub extracted_rows: usize,
    pub report_rows: usize,
    /// `None` when the report was empty and nothing was written.
    pub report_key: Option<String>,
    pub recorded_dates: Vec<NaiveDate>,
    pub meta_rows: Option<usize>,
}

/// One configured run of the daily report job.
pub struct XetraEtl {
    src: TableStore,
    trg: TableStore,
    meta_key: String,
    src_args: SourceConfig,
    trg_args: TargetConfig,
    now: NaiveDateTime,
    resolution: DateResolution,
}

impl XetraEtl {
    /// Set up a run at the current local time.
    pub fn new(
        src: TableStore,
        trg: TableStore,
        meta_key: impl Into<String>,
        src_args: SourceConfig,
        trg_args: TargetConfig,
    ) -> Result<Self, EtlError> {
        Self::with_now(
            src,
            trg,
            meta_key,
            src_args,
            trg_args,
            Local::now().naive_local(),
        )
    }

    /// Set up a run at a fixed wall-clock time.
    pub fn with_now(
        src: TableStore,
        trg: TableStore,
        meta_key: impl Into<String>,
        src_args: SourceConfig,
        trg_args: TargetConfig,
        now: NaiveDateTime,
    ) -> Result<Self, EtlError> {
        let meta_key = meta_key.into();
        let first_date = src_args.first_date().map_err(ConfigError::from)?;
        let resolution = meta::resolve(&trg, &meta_key, first_date, now.date())
            .map_err(EtlError::Resolve)?;
        info!(
            min_date = %resolution.min_date,
            dates = resolution.dates.len(),
            "Resolved extraction dates"
        );
        Ok(Self {
            src,
            trg,
            meta_key,
            src_args,
            trg_args,
            now,
            resolution,
        })
    }

    /// Connect both stores from a job file and set up a run at the current time.
    ///
    /// Relative local store roots are resolved against `base`.
    pub fn from_job(job: &JobConfig, base: &Path) -> Result<Self, EtlError> {
        let src = TableStore::new(job.source_store.connect(base)?);
        let trg = TableStore::new(job.target_store.connect(base)?);
        Self::new(
            src,
            trg,
            job.meta.meta_key.clone(),
            job.source.clone(),
            job.target.clone(),
        )
    }

    /// First date whose report rows are emitted.
    pub fn extract_date(&self) -> NaiveDate {
        self.resolution.min_date
    }

    /// Dates to extract, lookback day first.
    pub fn extract_date_list(&self) -> &[NaiveDate] {
        &self.resolution.dates
    }

    /// Dates recorded in the meta file after a successful load.
    pub fn meta_update_list(&self) -> Vec<NaiveDate> {
        self.resolution.dates_to_record()
    }

    pub fn plan(&self) -> Result<RunPlan, EtlError> {
        Ok(RunPlan {
            first_extract_date: self.src_args.first_date().map_err(ConfigError::from)?,
            today: self.now.date(),
            min_date: self.resolution.min_date,
            extract_dates: self.resolution.dates.clone(),
            lookback_date: self.resolution.lookback_date(),
            dates_to_record: self.resolution.dates_to_record(),
            report_key: self.report_key()?,
        })
    }

    fn report_key(&self) -> Result<String, EtlError> {
        Ok(self
            .trg_args
            .report_key(self.now)
            .map_err(ConfigError::from)?)
    }

    /// Read every source object under each date prefix into one frame.
    pub fn extract(&self) -> Result<DataFrame, EtlError> {
        info!("Extracting Xetra source files has started...");
        let opts = self.src_args.read_options().map_err(ConfigError::from)?;

        let mut frames = Vec::new();
        for date in &self.resolution.dates {
            let keys = self
                .src
                .list_keys(&format_date(*date))
                .map_err(EtlError::Extract)?;
            for key in keys {
                frames.push(self.src.read_table(&key, &opts).map_err(EtlError::Extract)?);
            }
        }
        let files = frames.len();
        let df = concat_frames(frames).map_err(EtlError::Extract)?;

        info!(files, rows = df.height(), "Extracting Xetra source files has finished.");
        Ok(df)
    }

    pub fn transform_report1(&self, df: &DataFrame) -> Result<DataFrame, EtlError> {
        Ok(transform::transform_report1(
            df,
            &self.src_args,
            &self.trg_args,
            self.resolution.min_date,
        )?)
    }

    /// Write the report, then record the processed dates in the meta file.
    pub fn load(&self, df: &DataFrame) -> Result<(WriteOutcome, MetaUpdate), EtlError> {
        info!("Loading the report has started...");
        let key = self.report_key()?;
        let format = self.trg_args.table_format().map_err(ConfigError::from)?;
        let outcome = self
            .trg
            .write_table_as(df, &key, format)
            .map_err(EtlError::Load)?;

        let update = meta::merge_and_persist(
            &self.trg,
            &self.meta_key,
            &self.meta_update_list(),
            self.now.date(),
        )
        .map_err(EtlError::MetaUpdate)?;

        info!("Loading the report has finished.");
        Ok((outcome, update))
    }

    /// Extract, transform and load report 1.
    pub fn etl_report1(&self) -> Result<RunSummary, EtlError> {
        let raw = self.extract()?;
        let report = self.transform_report1(&raw)?;
        let (outcome, update) = self.load(&report)?;

        let report_key = match outcome {
            WriteOutcome::Written { key, .. } => Some(key),
            WriteOutcome::SkippedEmpty => None,
        };
        let (recorded_dates, meta_rows) = match update {
            MetaUpdate::Written { total, .. } => (self.meta_update_list(), Some(total)),
            MetaUpdate::Skipped => (Vec::new(), None),
        };
        Ok(RunSummary {
            min_date: self.resolution.min_date,
            extracted_rows: raw.height(),
            report_rows: report.height(),
            report_key,
            recorded_dates,
            meta_rows,
        })
    }
}
