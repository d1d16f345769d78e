//! Daily report aggregation over intraday records.
//!
//! Pipeline: project the configured source columns and drop incomplete rows,
//! convert to [`RawRecord`]s, group by (instrument, date) in an ordered map,
//! take first/last price by time of day, aggregate the rest, compute the
//! change against the previous trading day per instrument, round, and drop
//! everything before `min_date` (the lookback day).

use crate::config::{SourceConfig, TargetConfig};
use crate::domain::{RawRecord, ReportRecord};
use crate::watermark::{format_date, DATE_FORMAT};
use chrono::{NaiveDate, NaiveTime};
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("column '{column}' is missing from the source data")]
    SchemaMismatch { column: String },

    #[error("invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("column '{column}' has an unusable type: {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("frame error: {0}")]
    Frame(#[from] PolarsError),
}

const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

/// Two decimals, halves to even.
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

fn text_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, TransformError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_owned))
        .collect())
}

fn cast_column(df: &DataFrame, name: &str, dtype: &DataType) -> Result<Column, TransformError> {
    df.column(name)?
        .strict_cast(dtype)
        .map_err(|e| TransformError::InvalidColumn {
            column: name.to_string(),
            reason: e.to_string(),
        })
}

/// NaN counts as missing.
fn float_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, TransformError> {
    let column = cast_column(df, name, &DataType::Float64)?;
    Ok(column
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

fn int_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, TransformError> {
    let column = cast_column(df, name, &DataType::Int64)?;
    Ok(column.i64()?.into_iter().collect())
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value.trim(), fmt).ok())
}

/// Project the configured columns, drop rows with a null in any of them, and
/// convert the rest into typed records.
pub fn records_from_frame(
    df: &DataFrame,
    src: &SourceConfig,
) -> Result<Vec<RawRecord>, TransformError> {
    let present: HashSet<&str> = df
        .get_column_names()
        .into_iter()
        .map(|n| n.as_str())
        .collect();
    for column in src.columns.iter().map(String::as_str).chain(src.mapped_columns()) {
        if !present.contains(column) {
            return Err(TransformError::SchemaMismatch {
                column: column.to_string(),
            });
        }
    }

    let height = df.height();
    let mut complete = vec![true; height];
    for column in &src.columns {
        let nulls = df.column(column)?.is_null();
        for (row, is_null) in nulls.into_iter().enumerate() {
            if is_null.unwrap_or(false) {
                complete[row] = false;
            }
        }
    }

    let isins = text_values(df, &src.col_isin)?;
    let dates = text_values(df, &src.col_date)?;
    let times = text_values(df, &src.col_time)?;
    let starts = float_values(df, &src.col_start_price)?;
    let ends = float_values(df, &src.col_end_price)?;
    let mins = float_values(df, &src.col_min_price)?;
    let maxs = float_values(df, &src.col_max_price)?;
    let volumes = int_values(df, &src.col_traded_vol)?;

    let mut records = Vec::with_capacity(height);
    for row in 0..height {
        if !complete[row] {
            continue;
        }
        let (
            Some(isin),
            Some(date),
            Some(time),
            Some(start_price),
            Some(end_price),
            Some(min_price),
            Some(max_price),
            Some(traded_volume),
        ) = (
            &isins[row],
            &dates[row],
            &times[row],
            starts[row],
            ends[row],
            mins[row],
            maxs[row],
            volumes[row],
        )
        else {
            continue;
        };

        let invalid = |column: &str, value: &str| TransformError::InvalidValue {
            column: column.to_string(),
            row,
            value: value.to_string(),
        };
        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
            .map_err(|_| invalid(&src.col_date, date))?;
        let time = parse_time(time).ok_or_else(|| invalid(&src.col_time, time))?;

        records.push(RawRecord {
            isin: isin.clone(),
            date,
            time,
            start_price,
            end_price,
            min_price,
            max_price,
            traded_volume,
        });
    }
    Ok(records)
}

/// Aggregate intraday records into one report row per (instrument, date).
///
/// Rows come out ordered by instrument, then date. The change column uses the
/// previous row of the same instrument in that order, so the first day of each
/// instrument has no change. Rows dated before `min_date` are computed (they
/// seed the change) and then dropped.
pub fn aggregate(records: &[RawRecord], min_date: NaiveDate) -> Vec<ReportRecord> {
    let mut groups: BTreeMap<(&str, NaiveDate), Vec<&RawRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.isin.as_str(), record.date))
            .or_default()
            .push(record);
    }

    let mut report = Vec::with_capacity(groups.len());
    let mut previous: Option<(&str, f64)> = None;
    for ((isin, date), mut rows) in groups {
        rows.sort_by_key(|r| r.time);
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            continue;
        };
        let opening_price = first.start_price;
        let closing_price = last.end_price;
        let min_price = rows.iter().map(|r| r.min_price).fold(f64::INFINITY, f64::min);
        let max_price = rows
            .iter()
            .map(|r| r.max_price)
            .fold(f64::NEG_INFINITY, f64::max);
        let traded_volume = rows.iter().map(|r| r.traded_volume).sum();

        let change = match previous {
            Some((prev_isin, prev_close)) if prev_isin == isin && prev_close != 0.0 => {
                Some((closing_price - prev_close) / prev_close * 100.0)
            }
            _ => None,
        };
        previous = Some((isin, closing_price));

        report.push(ReportRecord {
            isin: isin.to_string(),
            date,
            opening_price: round2(opening_price),
            closing_price: round2(closing_price),
            min_price: round2(min_price),
            max_price: round2(max_price),
            traded_volume,
            change_prev_closing_pct: change.map(round2),
        });
    }

    report.retain(|r| r.date >= min_date);
    report
}

/// Lay report records out as a frame with the target column names.
pub fn report_frame(
    report: &[ReportRecord],
    trg: &TargetConfig,
) -> Result<DataFrame, TransformError> {
    let isins: Vec<&str> = report.iter().map(|r| r.isin.as_str()).collect();
    let dates: Vec<String> = report.iter().map(|r| format_date(r.date)).collect();
    let opening: Vec<f64> = report.iter().map(|r| r.opening_price).collect();
    let closing: Vec<f64> = report.iter().map(|r| r.closing_price).collect();
    let mins: Vec<f64> = report.iter().map(|r| r.min_price).collect();
    let maxs: Vec<f64> = report.iter().map(|r| r.max_price).collect();
    let volumes: Vec<i64> = report.iter().map(|r| r.traded_volume).collect();
    let changes: Vec<Option<f64>> = report.iter().map(|r| r.change_prev_closing_pct).collect();

    Ok(DataFrame::new(vec![
        Column::new(trg.col_isin.as_str().into(), isins),
        Column::new(trg.col_date.as_str().into(), dates),
        Column::new(trg.col_opening_price.as_str().into(), opening),
        Column::new(trg.col_closing_price.as_str().into(), closing),
        Column::new(trg.col_min_price.as_str().into(), mins),
        Column::new(trg.col_max_price.as_str().into(), maxs),
        Column::new(trg.col_daily_traded_volume.as_str().into(), volumes),
        Column::new(trg.col_change.as_str().into(), changes),
    ])?)
}

/// Report 1: the full transform from raw source frame to report frame.
///
/// An empty input frame is returned unchanged.
pub fn transform_report1(
    df: &DataFrame,
    src: &SourceConfig,
    trg: &TargetConfig,
    min_date: NaiveDate,
) -> Result<DataFrame, TransformError> {
    if df.height() == 0 {
        info!("The dataframe is empty. No transformations will be applied.");
        return Ok(df.clone());
    }
    info!("Applying transformations to Xetra source data for report 1 started...");

    let records = records_from_frame(df, src)?;
    let dropped = df.height() - records.len();
    if dropped > 0 {
        info!(dropped, "Dropped source rows with missing values");
    }
    let report = aggregate(&records, min_date);
    let out = report_frame(&report, trg)?;

    info!(rows = out.height(), "Finished transformations of Xetra source data.");
    Ok(out)
}
