//! Source and target column configuration.
//!
//! Both structs are flat and deserialized from the job file; `validate()`
//! catches mistakes before any store is touched.

use crate::table::{ReadOptions, TableFormat, TextEncoding};
use crate::watermark::parse_date;
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid first extraction date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("column '{0}' is mapped but not among the projected source columns")]
    UnprojectedColumn(String),

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("delimiter {0:?} is not a single ASCII character")]
    InvalidDelimiter(char),

    #[error("invalid key timestamp format '{0}'")]
    InvalidKeyFormat(String),

    #[error("unsupported output format '{0}' (expected csv or parquet)")]
    UnsupportedFormat(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

fn default_delimiter() -> char {
    ','
}

/// Where the raw columns live in the source files and which ones to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Earliest date of interest, `YYYY-MM-DD`.
    pub first_extract_date: String,
    /// Columns projected from the raw files; rows with a null in any of them are dropped.
    pub columns: Vec<String>,
    pub col_date: String,
    pub col_isin: String,
    pub col_time: String,
    pub col_start_price: String,
    pub col_end_price: String,
    pub col_min_price: String,
    pub col_max_price: String,
    pub col_traded_vol: String,
    #[serde(default)]
    pub encoding: TextEncoding,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl SourceConfig {
    pub fn first_date(&self) -> Result<NaiveDate, ConfigError> {
        parse_date(&self.first_extract_date)
            .map_err(|_| ConfigError::InvalidDate(self.first_extract_date.clone()))
    }

    pub fn read_options(&self) -> Result<ReadOptions, ConfigError> {
        if !self.delimiter.is_ascii() {
            return Err(ConfigError::InvalidDelimiter(self.delimiter));
        }
        Ok(ReadOptions::csv(self.encoding, self.delimiter as u8))
    }

    /// The eight columns the aggregation reads, in record order.
    pub fn mapped_columns(&self) -> [&str; 8] {
        [
            self.col_isin.as_str(),
            self.col_date.as_str(),
            self.col_time.as_str(),
            self.col_start_price.as_str(),
            self.col_end_price.as_str(),
            self.col_min_price.as_str(),
            self.col_max_price.as_str(),
            self.col_traded_vol.as_str(),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.first_date()?;
        self.read_options()?;
        if self.columns.is_empty() {
            return Err(ConfigError::Empty("source.columns"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Err(ConfigError::DuplicateColumn(column.clone()));
            }
        }
        for column in self.mapped_columns() {
            if !seen.contains(column) {
                return Err(ConfigError::UnprojectedColumn(column.to_string()));
            }
        }
        Ok(())
    }
}

/// Report column names and where the report is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub col_isin: String,
    pub col_date: String,
    pub col_opening_price: String,
    pub col_closing_price: String,
    pub col_min_price: String,
    pub col_max_price: String,
    pub col_daily_traded_volume: String,
    pub col_change: String,
    /// Key prefix of the report object, e.g. `report1/xetra_daily_report1_`.
    pub key: String,
    /// strftime pattern appended to `key`, e.g. `%Y%m%d_%H%M%S`.
    pub key_date_format: String,
    /// `csv` or `parquet`.
    pub format: String,
}

impl TargetConfig {
    /// Report columns in output order.
    pub fn report_columns(&self) -> [&str; 8] {
        [
            self.col_isin.as_str(),
            self.col_date.as_str(),
            self.col_opening_price.as_str(),
            self.col_closing_price.as_str(),
            self.col_min_price.as_str(),
            self.col_max_price.as_str(),
            self.col_daily_traded_volume.as_str(),
            self.col_change.as_str(),
        ]
    }

    pub fn table_format(&self) -> Result<TableFormat, ConfigError> {
        self.format
            .parse()
            .map_err(|_| ConfigError::UnsupportedFormat(self.format.clone()))
    }

    /// `{key}{now formatted}.{format}`.
    pub fn report_key(&self, now: NaiveDateTime) -> Result<String, ConfigError> {
        let mut key = self.key.clone();
        write!(key, "{}.{}", now.format(&self.key_date_format), self.format)
            .map_err(|_| ConfigError::InvalidKeyFormat(self.key_date_format.clone()))?;
        Ok(key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.table_format()?;
        if self.key.is_empty() {
            return Err(ConfigError::Empty("target.key"));
        }
        if StrftimeItems::new(&self.key_date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidKeyFormat(self.key_date_format.clone()));
        }
        let mut seen = HashSet::new();
        for column in self.report_columns() {
            if column.is_empty() {
                return Err(ConfigError::Empty("target column name"));
            }
            if !seen.insert(column) {
                return Err(ConfigError::DuplicateColumn(column.to_string()));
            }
        }
        Ok(())
    }
}
