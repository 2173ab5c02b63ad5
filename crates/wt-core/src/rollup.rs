//! Daily and monthly rollups of the ledger.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::ledger::{date_key_for, decode_day, parse_date_key};
use crate::store::{Items, KeyValueStore, StoreError};

/// The span a rollup covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Period {
    Day { date: NaiveDate },
    Month { year: i32, month: u32 },
}

impl Period {
    pub const fn day(date: NaiveDate) -> Self {
        Self::Day { date }
    }

    /// Calendar month; `None` unless `month` is 1..=12.
    pub fn month(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self::Month { year, month })
    }

    /// The month containing `date`.
    pub fn month_of(date: NaiveDate) -> Self {
        Self::Month {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Self::Day { date: day } => day == date,
            Self::Month { year, month } => date.year() == year && date.month() == month,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Day { date } => write!(f, "{}", date.format("%A, %b %-d, %Y")),
            Self::Month { year, month } => match NaiveDate::from_ymd_opt(year, month, 1) {
                Some(first) => write!(f, "{}", first.format("%B %Y")),
                None => write!(f, "{year}-{month:02}"),
            },
        }
    }
}

/// Time attributed to one key over the period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollupEntry {
    pub key: String,
    pub ms: i64,
}

/// Per-key totals over a period, largest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rollup {
    pub period: Period,
    /// Days in the period with at least one recorded entry.
    pub days: usize,
    pub total_ms: i64,
    pub entries: Vec<RollupEntry>,
}

impl Rollup {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a rollup from a full store snapshot. Non-date keys are ignored.
    pub fn from_items(items: &Items, period: Period) -> Self {
        let mut sums: BTreeMap<String, i64> = BTreeMap::new();
        let mut days = 0;

        for (key, value) in items {
            let Some(date) = parse_date_key(key) else {
                continue;
            };
            if !period.contains(date) {
                continue;
            }
            let totals = match decode_day(key, value) {
                Ok(totals) => totals,
                Err(error) => {
                    tracing::warn!(%error, "skipping unreadable day");
                    continue;
                }
            };
            if totals.values().any(|ms| *ms > 0) {
                days += 1;
            }
            for (domain, ms) in totals {
                if ms > 0 {
                    let sum = sums.entry(domain).or_insert(0);
                    *sum = sum.saturating_add(ms);
                }
            }
        }

        let mut entries: Vec<_> = sums
            .into_iter()
            .map(|(key, ms)| RollupEntry { key, ms })
            .collect();
        entries.sort_by(|a, b| b.ms.cmp(&a.ms).then_with(|| a.key.cmp(&b.key)));
        let total_ms = entries.iter().fold(0_i64, |acc, e| acc.saturating_add(e.ms));

        Self {
            period,
            days,
            total_ms,
            entries,
        }
    }
}

/// Reads the rollup for `period` from the store.
pub async fn load_rollup<S: KeyValueStore>(store: &S, period: Period) -> Result<Rollup, StoreError> {
    let items = match period {
        Period::Day { date } => store.get(&[date_key_for(date).as_str()]).await?,
        Period::Month { .. } => store.get_all().await?,
    };
    Ok(Rollup::from_items(&items, period))
}
