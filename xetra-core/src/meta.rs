//! The meta file: persisted record of processed source dates.
//!
//! Layout: CSV with exactly two columns, `source_date` and
//! `processed_timestamp`, one row per processed date. Updates are
//! read-merge-overwrite: the existing rows are read, checked against the
//! expected columns, and written back followed by the new rows. Rows are never
//! deduplicated at rest; the resolver works on the distinct set.
//!
//! There is no locking. Two runs sharing one meta key can lose each other's
//! rows.

use crate::domain::MetaRecord;
use crate::table::{ReadOptions, TableError, TableFormat, TableStore};
use crate::watermark::{format_date, resolve_dates, DateResolution, DATE_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

pub const SOURCE_DATE_COL: &str = "source_date";
pub const PROCESSED_COL: &str = "processed_timestamp";

/// Errors from reading or updating the meta file.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("meta file columns {existing:?} do not match the expected {expected:?}")]
    WrongMetaFile {
        existing: Vec<String>,
        expected: Vec<String>,
    },

    #[error("malformed meta file: {0}")]
    MalformedMeta(String),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("frame error: {0}")]
    Frame(#[from] PolarsError),
}

/// Result of [`merge_and_persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaUpdate {
    /// Nothing to record; the meta object was left untouched.
    Skipped,
    Written { added: usize, total: usize },
}

/// Read the meta file, returning `None` when it does not exist yet.
fn read_meta(store: &TableStore, meta_key: &str) -> Result<Option<DataFrame>, MetaError> {
    match store.read_table(meta_key, &ReadOptions::default()) {
        Ok(df) => Ok(Some(df)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time of day.
fn parse_meta_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Distinct source dates recorded in the meta file, or `None` if there is no meta file.
pub fn read_processed_dates(
    store: &TableStore,
    meta_key: &str,
) -> Result<Option<BTreeSet<NaiveDate>>, MetaError> {
    let Some(df) = read_meta(store, meta_key)? else {
        return Ok(None);
    };
    if df.height() == 0 {
        return Ok(Some(BTreeSet::new()));
    }

    let column = df.column(SOURCE_DATE_COL).map_err(|_| {
        MetaError::MalformedMeta(format!("missing column '{SOURCE_DATE_COL}' in {meta_key}"))
    })?;
    let column = column.cast(&DataType::String)?;

    let mut dates = BTreeSet::new();
    for (row, value) in column.str()?.into_iter().enumerate() {
        let Some(value) = value else {
            warn!("Empty {SOURCE_DATE_COL} at row {row} of {meta_key}; skipping");
            continue;
        };
        let date = parse_meta_date(value).ok_or_else(|| {
            MetaError::MalformedMeta(format!(
                "unparseable {SOURCE_DATE_COL} '{value}' at row {row} of {meta_key}"
            ))
        })?;
        dates.insert(date);
    }
    Ok(Some(dates))
}

/// Resolve the dates a run has to extract, given the meta file at `meta_key`.
pub fn resolve(
    store: &TableStore,
    meta_key: &str,
    first_date: NaiveDate,
    today: NaiveDate,
) -> Result<DateResolution, MetaError> {
    let processed = read_processed_dates(store, meta_key)?;
    if processed.is_none() {
        info!("No meta file at {meta_key}; treating every date since {first_date} as unprocessed");
    }
    Ok(resolve_dates(first_date, today, processed.as_ref()))
}

/// Build the meta frame for freshly processed dates.
pub fn meta_frame(records: &[MetaRecord]) -> Result<DataFrame, MetaError> {
    let source: Vec<String> = records.iter().map(|r| format_date(r.source_date)).collect();
    let processed: Vec<String> = records
        .iter()
        .map(|r| format_date(r.processed_timestamp))
        .collect();
    Ok(DataFrame::new(vec![
        Column::new(SOURCE_DATE_COL.into(), source),
        Column::new(PROCESSED_COL.into(), processed),
    ])?)
}

fn sorted_names(df: &DataFrame) -> Vec<String> {
    let mut names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect();
    names.sort();
    names
}

/// Record `dates` as processed on `today` and write the merged meta file back.
///
/// An empty `dates` slice is a no-op. An existing meta file whose column set
/// differs from the expected one fails with [`MetaError::WrongMetaFile`] and
/// is left unmodified.
pub fn merge_and_persist(
    store: &TableStore,
    meta_key: &str,
    dates: &[NaiveDate],
    today: NaiveDate,
) -> Result<MetaUpdate, MetaError> {
    if dates.is_empty() {
        info!("No dates to record. The meta file {meta_key} is not written!");
        return Ok(MetaUpdate::Skipped);
    }

    let records: Vec<MetaRecord> = dates
        .iter()
        .map(|&source_date| MetaRecord {
            source_date,
            processed_timestamp: today,
        })
        .collect();
    let fragment = meta_frame(&records)?;

    let merged = match read_meta(store, meta_key)? {
        None => fragment,
        Some(existing) => {
            let expected = sorted_names(&fragment);
            let found = sorted_names(&existing);
            if found != expected {
                return Err(MetaError::WrongMetaFile {
                    existing: found,
                    expected,
                });
            }
            let columns = [SOURCE_DATE_COL, PROCESSED_COL]
                .iter()
                .map(|name| existing.column(name)?.cast(&DataType::String))
                .collect::<PolarsResult<Vec<Column>>>()?;
            let mut merged = DataFrame::new(columns)?;
            merged.vstack_mut(&fragment)?;
            merged
        }
    };

    let total = merged.height();
    store.write_table_as(&merged, meta_key, TableFormat::Csv)?;
    info!(
        added = records.len(),
        total, "Meta file {meta_key} is successfully updated"
    );
    Ok(MetaUpdate::Written {
        added: records.len(),
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, ObjectStore};
    use crate::watermark::{date_range, far_future, parse_date};
    use std::sync::Arc;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn stores() -> (Arc<InMemoryStore>, TableStore) {
        let store = Arc::new(InMemoryStore::new("meta-bucket"));
        let tables = TableStore::new(store.clone());
        (store, tables)
    }

    fn meta_csv(header: &str, rows: &[(NaiveDate, NaiveDate)]) -> Vec<u8> {
        let mut lines = vec![header.to_string()];
        lines.extend(
            rows.iter()
                .map(|(s, p)| format!("{},{}", format_date(*s), format_date(*p))),
        );
        lines.join("\n").into_bytes()
    }

    fn read_back(tables: &TableStore, key: &str) -> (Vec<String>, Vec<String>) {
        let df = tables.read_table(key, &ReadOptions::default()).unwrap();
        let col = |name: &str| -> Vec<String> {
            df.column(name)
                .unwrap()
                .cast(&DataType::String)
                .unwrap()
                .str()
                .unwrap()
                .into_iter()
                .map(|v| v.unwrap().to_string())
                .collect()
        };
        (col(SOURCE_DATE_COL), col(PROCESSED_COL))
    }

    #[test]
    fn update_without_previous_meta_file() {
        let (_, tables) = stores();
        let today = d("2022-11-26");
        let outcome = merge_and_persist(
            &tables,
            "new_metafile.csv",
            &[d("2022-11-24"), d("2022-11-25")],
            today,
        )
        .unwrap();

        assert_eq!(outcome, MetaUpdate::Written { added: 2, total: 2 });
        let (source, processed) = read_back(&tables, "new_metafile.csv");
        assert_eq!(source, vec!["2022-11-24", "2022-11-25"]);
        assert_eq!(processed, vec!["2022-11-26", "2022-11-26"]);
    }

    #[test]
    fn update_appends_to_existing_meta_file() {
        let (store, tables) = stores();
        let old = [
            (d("2022-11-22"), d("2022-11-23")),
            (d("2022-11-23"), d("2022-11-23")),
        ];
        store
            .put(
                "metafile.csv",
                meta_csv("source_date,processed_timestamp", &old),
            )
            .unwrap();

        merge_and_persist(
            &tables,
            "metafile.csv",
            &[d("2022-11-24"), d("2022-11-25")],
            d("2022-11-26"),
        )
        .unwrap();

        let (source, processed) = read_back(&tables, "metafile.csv");
        assert_eq!(
            source,
            vec!["2022-11-22", "2022-11-23", "2022-11-24", "2022-11-25"]
        );
        assert_eq!(
            processed,
            vec!["2022-11-23", "2022-11-23", "2022-11-26", "2022-11-26"]
        );
    }

    #[test]
    fn column_order_of_existing_file_does_not_matter() {
        let (store, tables) = stores();
        store
            .put(
                "metafile.csv",
                b"processed_timestamp,source_date\n2022-11-23,2022-11-22".to_vec(),
            )
            .unwrap();

        merge_and_persist(&tables, "metafile.csv", &[d("2022-11-24")], d("2022-11-26")).unwrap();

        let (source, _) = read_back(&tables, "metafile.csv");
        assert_eq!(source, vec!["2022-11-22", "2022-11-24"]);
    }

    #[test]
    fn empty_update_writes_nothing() {
        let (store, tables) = stores();
        let outcome = merge_and_persist(&tables, "metafile.csv", &[], d("2022-11-26")).unwrap();
        assert_eq!(outcome, MetaUpdate::Skipped);
        assert!(store.is_empty());
    }

    #[test]
    fn wrong_meta_file_is_rejected_and_kept() {
        let (store, tables) = stores();
        let original = meta_csv(
            "source_col2,proc_col2",
            &[(d("2022-11-22"), d("2022-11-23"))],
        );
        store.put("metafile.csv", original.clone()).unwrap();

        let err = merge_and_persist(
            &tables,
            "metafile.csv",
            &[d("2022-11-24"), d("2022-11-25")],
            d("2022-11-26"),
        )
        .unwrap_err();

        assert!(matches!(err, MetaError::WrongMetaFile { .. }));
        assert_eq!(store.get("metafile.csv").unwrap(), original);
    }

    #[test]
    fn repeated_merges_keep_duplicates() {
        let (_, tables) = stores();
        let today = d("2022-11-26");
        merge_and_persist(&tables, "m.csv", &[d("2022-11-24")], today).unwrap();
        let outcome = merge_and_persist(&tables, "m.csv", &[d("2022-11-24")], today).unwrap();
        assert_eq!(outcome, MetaUpdate::Written { added: 1, total: 2 });

        let processed = read_processed_dates(&tables, "m.csv").unwrap().unwrap();
        assert_eq!(processed.len(), 1);
    }

    #[test]
    fn resolve_without_meta_file() {
        let (_, tables) = stores();
        let today = d("2022-11-30");
        let res = resolve(&tables, "meta_file.csv", d("2022-11-22"), today).unwrap();
        assert_eq!(res.min_date, d("2022-11-22"));
        assert_eq!(res.dates, date_range(d("2022-11-21"), today));
    }

    #[test]
    fn resolve_when_all_dates_are_done() {
        let (store, tables) = stores();
        let today = d("2022-11-30");
        let rows: Vec<_> = date_range(d("2022-11-23"), today)
            .into_iter()
            .map(|s| (s, today))
            .collect();
        store
            .put("metafile.csv", meta_csv("source_date,processed_timestamp", &rows))
            .unwrap();

        let res = resolve(&tables, "metafile.csv", d("2022-11-23"), today).unwrap();
        assert_eq!(res.min_date, far_future());
        assert!(res.dates.is_empty());
    }

    #[test]
    fn resolve_with_gaps() {
        let (store, tables) = stores();
        let today = d("2022-11-30");
        let all = date_range(d("2022-11-23"), today);
        let rows: Vec<_> = all.iter().step_by(2).map(|s| (*s, today)).collect();
        store
            .put("metafile.csv", meta_csv("source_date,processed_timestamp", &rows))
            .unwrap();

        let res = resolve(&tables, "metafile.csv", all[4], today).unwrap();
        assert_eq!(res.min_date, all[5]);
        assert_eq!(res.dates, all[4..].to_vec());
    }

    #[test]
    fn resolve_accepts_timestamps_in_source_date() {
        let (store, tables) = stores();
        store
            .put(
                "metafile.csv",
                b"source_date,processed_timestamp\n2022-11-29 00:00:00,2022-11-30\n2022-11-30,2022-11-30"
                    .to_vec(),
            )
            .unwrap();

        let res = resolve(&tables, "metafile.csv", d("2022-11-29"), d("2022-11-30")).unwrap();
        assert!(res.is_noop());
    }

    #[test]
    fn resolve_with_wrong_column_names_fails() {
        let (store, tables) = stores();
        store
            .put(
                "metafile.csv",
                b"wrong_col_name,processed_timestamp\n2022-11-23,2022-11-23".to_vec(),
            )
            .unwrap();

        let err = resolve(&tables, "metafile.csv", d("2022-11-23"), d("2022-11-30")).unwrap_err();
        assert!(matches!(err, MetaError::MalformedMeta(_)));
    }

    #[test]
    fn resolve_with_unparseable_date_fails() {
        let (store, tables) = stores();
        store
            .put(
                "metafile.csv",
                b"source_date,processed_timestamp\nnot-a-date,2022-11-23".to_vec(),
            )
            .unwrap();

        let err = resolve(&tables, "metafile.csv", d("2022-11-23"), d("2022-11-30")).unwrap_err();
        assert!(matches!(err, MetaError::MalformedMeta(_)));
    }

    #[test]
    fn empty_source_date_cells_are_skipped() {
        let (store, tables) = stores();
        store
            .put(
                "metafile.csv",
                b"source_date,processed_timestamp\n2022-11-29,2022-11-30\n,2022-11-30\n".to_vec(),
            )
            .unwrap();

        let dates = read_processed_dates(&tables, "metafile.csv").unwrap().unwrap();
        assert_eq!(dates.into_iter().collect::<Vec<_>>(), vec![d("2022-11-29")]);
    }
}
