//! Date-set arithmetic behind the incremental watermark.
//!
//! Everything here is pure: the caller supplies `today` and the set of source
//! dates already recorded in the meta file, so the rules can be tested without
//! a store or a clock.
//!
//! The date list always starts one day before the earliest pending date (the
//! lookback day). Its rows only seed the day-over-day change of the first
//! emitted day and are dropped from the report.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

/// Date format used in keys, config and the meta file.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `min_date` returned when every candidate date is already processed.
pub fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2200, 1, 1).unwrap_or(NaiveDate::MAX)
}

pub fn parse_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Every calendar day in `[start, end]`; empty when `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// What a run has to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateResolution {
    /// First date whose report rows are emitted; [`far_future`] when nothing is pending.
    pub min_date: NaiveDate,
    /// Dates to extract, ascending, lookback day first. Empty means nothing to do.
    pub dates: Vec<NaiveDate>,
}

impl DateResolution {
    pub fn is_noop(&self) -> bool {
        self.dates.is_empty()
    }

    /// Dates recorded in the meta file after a successful load: the resolved
    /// dates without the lookback day.
    pub fn dates_to_record(&self) -> Vec<NaiveDate> {
        self.dates
            .iter()
            .copied()
            .filter(|d| *d >= self.min_date)
            .collect()
    }

    /// The extra day fetched only for the change computation, if any.
    pub fn lookback_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied().filter(|d| *d < self.min_date)
    }
}

/// Decide which dates still need processing.
///
/// `processed` is `None` when no meta file exists yet: every day from the
/// lookback day through `today` is returned and `min_date` is `first_date`.
/// Otherwise the earliest candidate after the lookback day that is missing
/// from `processed` becomes `min_date`, and the list restarts one day before
/// it. When nothing is missing, the list is empty and `min_date` is the far
/// future.
pub fn resolve_dates(
    first_date: NaiveDate,
    today: NaiveDate,
    processed: Option<&BTreeSet<NaiveDate>>,
) -> DateResolution {
    let lookback = first_date.pred_opt().unwrap_or(first_date);
    let candidates = date_range(lookback, today);

    let Some(processed) = processed else {
        return DateResolution {
            min_date: first_date,
            dates: candidates,
        };
    };

    let earliest_missing = candidates
        .iter()
        .skip(1)
        .find(|d| !processed.contains(d))
        .copied();

    match earliest_missing {
        Some(missing) => {
            let restart = missing.pred_opt().unwrap_or(missing);
            DateResolution {
                min_date: missing,
                dates: candidates.into_iter().filter(|d| *d >= restart).collect(),
            }
        }
        None => DateResolution {
            min_date: far_future(),
            dates: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn set(dates: &[NaiveDate]) -> BTreeSet<NaiveDate> {
        dates.iter().copied().collect()
    }

    #[test]
    fn range_is_inclusive() {
        let r = date_range(d("2022-11-28"), d("2022-12-02"));
        assert_eq!(r.len(), 5);
        assert_eq!(r[0], d("2022-11-28"));
        assert_eq!(r[4], d("2022-12-02"));
        assert!(date_range(d("2022-12-02"), d("2022-11-28")).is_empty());
    }

    #[test]
    fn no_meta_returns_everything_from_lookback() {
        let res = resolve_dates(d("2022-11-22"), d("2022-11-25"), None);
        assert_eq!(res.min_date, d("2022-11-22"));
        assert_eq!(res.dates, date_range(d("2022-11-21"), d("2022-11-25")));
        assert_eq!(res.lookback_date(), Some(d("2022-11-21")));
        assert_eq!(res.dates_to_record().len(), 4);
    }

    #[test]
    fn all_dates_done_is_noop() {
        let today = d("2022-11-30");
        let done = set(&date_range(d("2022-11-23"), today));
        let res = resolve_dates(d("2022-11-23"), today, Some(&done));
        assert!(res.is_noop());
        assert_eq!(res.min_date, far_future());
        assert!(res.dates_to_record().is_empty());
    }

    #[test]
    fn lookback_day_is_never_missing() {
        // 2022-11-22 (the lookback day) is absent from the meta file; it must
        // not trigger reprocessing.
        let today = d("2022-11-25");
        let done = set(&date_range(d("2022-11-23"), today));
        let res = resolve_dates(d("2022-11-23"), today, Some(&done));
        assert!(res.is_noop());
    }

    #[test]
    fn last_two_days_missing() {
        let today = d("2022-11-30");
        let all = date_range(d("2022-11-23"), today);
        let done = set(&all[..all.len() - 2]);
        let res = resolve_dates(d("2022-11-23"), today, Some(&done));
        assert_eq!(res.min_date, all[all.len() - 2]);
        assert_eq!(res.dates, all[all.len() - 3..].to_vec());
    }

    #[test]
    fn gap_restarts_before_the_gap() {
        let today = d("2022-11-30");
        let all = date_range(d("2022-11-23"), today);
        // every other day processed: 23, 25, 27, 29
        let done: BTreeSet<NaiveDate> = all.iter().copied().step_by(2).collect();

        let res = resolve_dates(all[4], today, Some(&done));
        assert_eq!(res.min_date, all[5]);
        assert_eq!(res.dates, all[4..].to_vec());

        let res = resolve_dates(all[5], today, Some(&done));
        assert_eq!(res.min_date, all[5]);
        assert_eq!(res.dates, all[4..].to_vec());
    }

    #[test]
    fn first_date_tomorrow_with_meta_is_noop() {
        let today = d("2022-11-30");
        let done = set(&date_range(d("2022-11-23"), d("2022-11-29")));
        let res = resolve_dates(d("2022-12-01"), today, Some(&done));
        assert!(res.is_noop());
        assert_eq!(res.min_date, far_future());
    }

    #[test]
    fn first_date_in_future_without_meta() {
        let today = d("2022-11-30");
        let res = resolve_dates(d("2022-12-01"), today, None);
        assert_eq!(res.dates, vec![today]);
        assert!(res.dates_to_record().is_empty());

        let res = resolve_dates(d("2022-12-05"), today, None);
        assert!(res.is_noop());
    }
}
