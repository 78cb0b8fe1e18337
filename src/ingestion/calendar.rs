//! Calendar buckets: ISO week start, month key and the week-range label.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn week_key(date: NaiveDate) -> String {
    day_key(week_start(date))
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Week-range labels (`W<n> (YYYY.MM.DD~YYYY.MM.DD)`) spanning the first and
/// last date actually observed in each week.
#[derive(Debug, Default, Clone)]
pub struct WeekLabels {
    spans: BTreeMap<NaiveDate, (NaiveDate, NaiveDate)>,
}

impl WeekLabels {
    pub fn from_dates<'a>(dates: impl IntoIterator<Item = &'a NaiveDate>) -> Self {
        let mut spans: BTreeMap<NaiveDate, (NaiveDate, NaiveDate)> = BTreeMap::new();
        for date in dates {
            spans
                .entry(week_start(*date))
                .and_modify(|(lo, hi)| {
                    *lo = (*lo).min(*date);
                    *hi = (*hi).max(*date);
                })
                .or_insert((*date, *date));
        }
        Self { spans }
    }

    pub fn label(&self, date: NaiveDate) -> Option<String> {
        let start = week_start(date);
        self.spans.get(&start).map(|(lo, hi)| {
            format!(
                "W{} ({}~{})",
                start.iso_week().week(),
                lo.format("%Y.%m.%d"),
                hi.format("%Y.%m.%d")
            )
        })
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
