//! Record types flowing through the daily report job.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One intraday row from the source bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub isin: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub start_price: f64,
    pub end_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub traded_volume: i64,
}

/// One report row per instrument and trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub isin: String,
    pub date: NaiveDate,
    pub opening_price: f64,
    pub closing_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub traded_volume: i64,
    /// Percent change against the previous trading day's close.
    /// `None` when no previous day is present in the batch.
    pub change_prev_closing_pct: Option<f64>,
}

/// One row of the meta file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub source_date: NaiveDate,
    pub processed_timestamp: NaiveDate,
}
