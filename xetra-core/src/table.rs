//! Tabular datasets on top of an object store.
//!
//! A [`TableStore`] wraps any [`ObjectStore`] and speaks Polars `DataFrame`s:
//! CSV for source files and the meta file, CSV or Parquet for reports.

use crate::store::{ObjectStore, StoreError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from reading or writing tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("unsupported table format '{0}' (expected csv or parquet)")]
    UnsupportedFormat(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to {action} '{key}': {reason}")]
    Codec {
        action: &'static str,
        key: String,
        reason: String,
    },

    #[error("frame error: {0}")]
    Frame(#[from] PolarsError),
}

impl TableError {
    /// True when the underlying object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TableError::Store(StoreError::NotFound { .. }))
    }
}

/// On-store encoding of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

impl FromStr for TableFormat {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(TableFormat::Csv),
            "parquet" => Ok(TableFormat::Parquet),
            other => Err(TableError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Text decoding applied to CSV bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    /// Invalid sequences are replaced instead of failing the read.
    #[serde(rename = "utf-8-lossy")]
    Utf8Lossy,
}

/// How to decode an object into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub format: TableFormat,
    pub encoding: TextEncoding,
    pub delimiter: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            format: TableFormat::Csv,
            encoding: TextEncoding::Utf8,
            delimiter: b',',
        }
    }
}

impl ReadOptions {
    pub fn csv(encoding: TextEncoding, delimiter: u8) -> Self {
        Self {
            format: TableFormat::Csv,
            encoding,
            delimiter,
        }
    }

    pub fn parquet() -> Self {
        Self {
            format: TableFormat::Parquet,
            ..Self::default()
        }
    }
}

/// Result of a table write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { key: String, rows: usize },
    /// The frame had no rows; nothing was sent to the store.
    SkippedEmpty,
}

/// Table-level access to one bucket.
#[derive(Clone)]
pub struct TableStore {
    store: Arc<dyn ObjectStore>,
}

impl TableStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn location(&self) -> String {
        self.store.describe()
    }

    pub fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TableError> {
        Ok(self.store.list_keys(prefix)?)
    }

    pub fn read_table(&self, key: &str, opts: &ReadOptions) -> Result<DataFrame, TableError> {
        info!("Reading {}/{key}", self.location());
        let body = self.store.get(key)?;
        decode(body, opts).map_err(|e| TableError::Codec {
            action: "decode",
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read a CSV object with an explicit encoding and delimiter.
    pub fn read_csv(
        &self,
        key: &str,
        encoding: TextEncoding,
        delimiter: u8,
    ) -> Result<DataFrame, TableError> {
        self.read_table(key, &ReadOptions::csv(encoding, delimiter))
    }

    /// Write a frame under `key`, with the format given as text (`csv` or `parquet`).
    ///
    /// The format is checked before anything else, so an unsupported value never
    /// reaches the store. Zero-row frames are skipped.
    pub fn write_table(
        &self,
        df: &DataFrame,
        key: &str,
        format: &str,
    ) -> Result<WriteOutcome, TableError> {
        let format: TableFormat = format.parse()?;
        self.write_table_as(df, key, format)
    }

    pub fn write_table_as(
        &self,
        df: &DataFrame,
        key: &str,
        format: TableFormat,
    ) -> Result<WriteOutcome, TableError> {
        if df.height() == 0 {
            info!("Attempted to write an empty data frame. No file will be written!");
            return Ok(WriteOutcome::SkippedEmpty);
        }
        let body = encode(df, format).map_err(|e| TableError::Codec {
            action: "encode",
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        debug!(key, bytes = body.len(), %format, "writing table");
        self.store.put(key, body)?;
        info!("The data frame is written under the key={key}");
        Ok(WriteOutcome::Written {
            key: key.to_string(),
            rows: df.height(),
        })
    }
}

fn decode(body: Vec<u8>, opts: &ReadOptions) -> PolarsResult<DataFrame> {
    if body.is_empty() {
        return Ok(DataFrame::empty());
    }
    match opts.format {
        TableFormat::Csv => {
            let encoding = match opts.encoding {
                TextEncoding::Utf8 => CsvEncoding::Utf8,
                TextEncoding::Utf8Lossy => CsvEncoding::LossyUtf8,
            };
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(opts.delimiter)
                        .with_encoding(encoding),
                )
                .into_reader_with_file_handle(Cursor::new(body))
                .finish()
        }
        TableFormat::Parquet => ParquetReader::new(Cursor::new(body)).finish(),
    }
}

fn encode(df: &DataFrame, format: TableFormat) -> PolarsResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut df = df.clone();
    match format {
        TableFormat::Csv => {
            CsvWriter::new(&mut buf)
                .include_header(true)
                .finish(&mut df)?;
        }
        TableFormat::Parquet => {
            ParquetWriter::new(&mut buf).finish(&mut df)?;
        }
    }
    Ok(buf)
}

/// Stack frames vertically in the column order of the first non-empty one.
///
/// Independently inferred CSV files can disagree on dtypes (a file with only
/// whole-number prices reads as integers), so each column is widened to the
/// common supertype of all frames. Frames without rows (a zero-byte object or
/// a header-only CSV) are skipped so they neither define the column set nor
/// widen every column to text. A column missing from a later frame is an error.
pub fn concat_frames(frames: Vec<DataFrame>) -> Result<DataFrame, TableError> {
    let (frames, skipped): (Vec<DataFrame>, Vec<DataFrame>) =
        frames.into_iter().partition(|df| df.height() > 0);
    if !skipped.is_empty() {
        warn!(skipped = skipped.len(), "Skipping source tables without rows");
    }
    let Some(first) = frames.first() else {
        return Ok(DataFrame::empty());
    };
    if frames.len() == 1 {
        return Ok(first.clone());
    }

    let names: Vec<PlSmallStr> = first.get_column_names_owned();
    let projected = frames
        .iter()
        .map(|df| Ok(df.select(names.iter().cloned())?.lazy()))
        .collect::<PolarsResult<Vec<LazyFrame>>>()?;
    let combined = concat(
        projected,
        UnionArgs {
            to_supertypes: true,
            rechunk: true,
            ..Default::default()
        },
    )?
    .collect()?;
    Ok(combined)
}
