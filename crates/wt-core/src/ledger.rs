//! The daily ledger: per-day, per-key accumulated milliseconds.
//!
//! Each day is stored under its local calendar date (`YYYY-MM-DD`) as a map of
//! attribution key to milliseconds. The store has no transactions, so every
//! read-modify-write of a day goes through one async mutex shared by all clones
//! of a [`Ledger`]. Two concurrent adds to the same day can therefore never
//! overwrite each other.
//!
//! Day maps are decoded entry by entry. A bad entry is skipped on read and left
//! untouched on write; a day that is not a map at all is an error and is never
//! overwritten.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::store::{Items, KeyValueStore, StoreError};
use crate::types::AttributionKey;

/// Accumulated milliseconds per attribution key for one day.
pub type DayTotals = BTreeMap<String, i64>;

/// Storage key of the local calendar day containing `instant`.
pub fn date_key(instant: DateTime<Utc>) -> String {
    date_key_for(instant.with_timezone(&Local).date_naive())
}

/// Storage key of `date`.
pub fn date_key_for(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses a storage key back into a date, if it is a day entry.
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    if key.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

fn day_map(date: &str, value: &Value) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_value(value.clone()).map_err(|source| StoreError::Codec {
        key: date.to_string(),
        source,
    })
}

/// Milliseconds stored in one day entry. Floats are rounded.
#[allow(clippy::cast_possible_truncation)]
fn entry_ms(value: &Value) -> Option<i64> {
    if let Some(ms) = value.as_i64() {
        return Some(ms);
    }
    // Out-of-range values saturate.
    value
        .as_f64()
        .filter(|ms| ms.is_finite())
        .map(|ms| ms.round() as i64)
}

const fn is_transient(error: &StoreError) -> bool {
    matches!(error, StoreError::Backend(_))
}

/// Decodes a stored day map, skipping entries that are not numbers.
pub fn decode_day(date: &str, value: &Value) -> Result<DayTotals, StoreError> {
    let map = day_map(date, value)?;
    Ok(map
        .iter()
        .filter_map(|(key, value)| match entry_ms(value) {
            Some(ms) => Some((key.clone(), ms)),
            None => {
                tracing::warn!(date, key = %key, %value, "skipping malformed ledger entry");
                None
            }
        })
        .collect())
}

/// How often and how patiently a failed ledger write is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below one act as one.
    pub attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Serialized accumulation into the daily ledger.
#[derive(Debug, Clone)]
pub struct Ledger<S> {
    store: S,
    lock: Arc<Mutex<()>>,
    retry: RetryPolicy,
}

impl<S: KeyValueStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
            retry,
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Reads one day's totals. Absent days are empty.
    pub async fn day(&self, date: &str) -> Result<DayTotals, StoreError> {
        let items = self.store.get(&[date]).await?;
        items
            .get(date)
            .map_or_else(|| Ok(DayTotals::new()), |value| decode_day(date, value))
    }

    /// Stored milliseconds for `key` on `date`.
    pub async fn total(&self, date: &str, key: &AttributionKey) -> Result<i64, StoreError> {
        Ok(self.day(date).await?.get(key.as_str()).copied().unwrap_or(0))
    }

    /// Adds `ms` to `key` on `date`, returning the new total.
    ///
    /// Negative amounts are ignored so totals never decrease. Failed writes
    /// are retried with exponential backoff according to the retry policy.
    pub async fn add(&self, date: &str, key: &AttributionKey, ms: i64) -> Result<i64, StoreError> {
        let _guard = self.lock.lock().await;
        let ms = ms.max(0);
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.base_delay;
        let mut attempt = 1;
        loop {
            match self.read_modify_write(date, key, ms).await {
                Ok(total) => return Ok(total),
                Err(error) if attempt < attempts && is_transient(&error) => {
                    tracing::warn!(date, key = %key, attempt, %error, "ledger write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn read_modify_write(
        &self,
        date: &str,
        key: &AttributionKey,
        ms: i64,
    ) -> Result<i64, StoreError> {
        let items = self.store.get(&[date]).await?;
        let mut day = match items.get(date) {
            Some(value) => day_map(date, value)?,
            None => Map::new(),
        };

        let stored = match day.get(key.as_str()) {
            None => 0,
            Some(value) => entry_ms(value).unwrap_or_else(|| {
                tracing::warn!(date, key = %key, %value, "replacing malformed ledger entry");
                0
            }),
        };
        let total = stored.saturating_add(ms);
        day.insert(key.to_string(), Value::from(total));

        self.store
            .set(Items::from([(date.to_string(), Value::Object(day))]))
            .await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use crate::store::MemoryStore;

    const DAY: &str = "2025-01-15";

    fn key(s: &str) -> AttributionKey {
        AttributionKey::new(s).unwrap()
    }

    /// Store that yields between every operation so concurrent callers interleave.
    #[derive(Clone, Default)]
    struct InterleavingStore {
        inner: MemoryStore,
    }

    impl KeyValueStore for InterleavingStore {
        async fn get(&self, keys: &[&str]) -> Result<Items, StoreError> {
            let items = self.inner.get(keys).await;
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            items
        }

        async fn get_all(&self) -> Result<Items, StoreError> {
            self.inner.get_all().await
        }

        async fn set(&self, items: Items) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.set(items).await
        }

        async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
            self.inner.remove(keys).await
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear().await
        }
    }

    /// Store whose first `failures` writes fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl KeyValueStore for FlakyStore {
        async fn get(&self, keys: &[&str]) -> Result<Items, StoreError> {
            self.inner.get(keys).await
        }

        async fn get_all(&self) -> Result<Items, StoreError> {
            self.inner.get_all().await
        }

        async fn set(&self, items: Items) -> Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("quota exceeded".into()));
            }
            self.inner.set(items).await
        }

        async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
            self.inner.remove(keys).await
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear().await
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn date_keys_round_trip() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(date_key_for(date), "2025-01-05");
        assert_eq!(parse_date_key("2025-01-05"), Some(date));
        assert_eq!(parse_date_key("limits"), None);
        assert_eq!(parse_date_key("2025-1-5"), None);
    }

    #[tokio::test]
    async fn add_accumulates_per_key() {
        let ledger = Ledger::new(MemoryStore::new());
        assert_eq!(ledger.add(DAY, &key("a.com"), 1000).await.unwrap(), 1000);
        assert_eq!(ledger.add(DAY, &key("a.com"), 500).await.unwrap(), 1500);
        ledger.add(DAY, &key("b.com"), 200).await.unwrap();

        let day = ledger.day(DAY).await.unwrap();
        assert_eq!(day.get("a.com"), Some(&1500));
        assert_eq!(day.get("b.com"), Some(&200));
    }

    #[tokio::test]
    async fn write_then_read_preserves_integer() {
        let store = MemoryStore::new();
        let ledger = Ledger::new(store.clone());
        ledger.add(DAY, &key("x.com"), 5000).await.unwrap();

        assert_eq!(ledger.total(DAY, &key("x.com")).await.unwrap(), 5000);
        let raw = store.get(&[DAY]).await.unwrap();
        assert_eq!(raw[DAY], json!({"x.com": 5000}));
    }

    #[tokio::test]
    async fn negative_amounts_never_decrease_totals() {
        let ledger = Ledger::new(MemoryStore::new());
        ledger.add(DAY, &key("a.com"), 1000).await.unwrap();
        assert_eq!(ledger.add(DAY, &key("a.com"), -400).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn concurrent_adds_to_same_day_are_not_lost() {
        let store = InterleavingStore::default();
        let periodic = Ledger::new(store.clone());
        let focus_change = periodic.clone();
        let domain = key("example.com");

        let (a, b) = tokio::join!(
            periodic.add(DAY, &domain, 60_000),
            focus_change.add(DAY, &domain, 1_500),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(periodic.total(DAY, &domain).await.unwrap(), 61_500);
    }

    #[tokio::test]
    async fn concurrent_adds_to_different_keys_both_land() {
        let ledger = Ledger::new(InterleavingStore::default());
        let other = ledger.clone();

        let a_key = key("a.com");
        let b_key = key("b.com");
        let (a, b) = tokio::join!(ledger.add(DAY, &a_key, 10), other.add(DAY, &b_key, 20));
        a.unwrap();
        b.unwrap();

        let day = ledger.day(DAY).await.unwrap();
        assert_eq!(day.get("a.com"), Some(&10));
        assert_eq!(day.get("b.com"), Some(&20));
    }

    #[tokio::test]
    async fn add_after_clear_recreates_the_day() {
        let store = MemoryStore::new();
        let ledger = Ledger::new(store.clone());
        ledger.add(DAY, &key("a.com"), 1000).await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(ledger.add(DAY, &key("a.com"), 250).await.unwrap(), 250);
    }

    #[tokio::test]
    async fn mixed_day_keeps_every_entry_on_add() {
        let store = MemoryStore::new();
        store
            .set(Items::from([(
                DAY.to_string(),
                json!({"a.com": 3_600_000, "b.com": 1500.5, "c.com": "soon"}),
            )]))
            .await
            .unwrap();
        let ledger = Ledger::new(store.clone());

        assert_eq!(ledger.add(DAY, &key("d.com"), 2000).await.unwrap(), 2000);
        assert_eq!(ledger.add(DAY, &key("b.com"), 500).await.unwrap(), 2001);

        let raw = store.get(&[DAY]).await.unwrap();
        assert_eq!(
            raw[DAY],
            json!({"a.com": 3_600_000, "b.com": 2001, "c.com": "soon", "d.com": 2000})
        );

        let day = ledger.day(DAY).await.unwrap();
        assert_eq!(day.get("a.com"), Some(&3_600_000));
        assert_eq!(day.get("c.com"), None);
        assert_eq!(day.len(), 3);
    }

    #[tokio::test]
    async fn day_that_is_not_a_map_is_never_overwritten() {
        let store = MemoryStore::new();
        store
            .set(Items::from([(DAY.to_string(), json!([1, 2, 3]))]))
            .await
            .unwrap();
        let ledger = Ledger::with_retry(store.clone(), fast_retry(3));

        let err = ledger.add(DAY, &key("a.com"), 1000).await.unwrap_err();
        assert!(matches!(err, StoreError::Codec { ref key, .. } if key == DAY));
        assert!(ledger.day(DAY).await.is_err());
        assert_eq!(store.get(&[DAY]).await.unwrap()[DAY], json!([1, 2, 3]));
    }

    #[test]
    fn decode_day_rounds_floats_and_skips_junk() {
        let stored = json!({"a": 1, "b": 2.0, "c": 2.6, "d": null, "e": true});
        let day = decode_day(DAY, &stored).unwrap();
        assert_eq!(
            day,
            DayTotals::from([
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 3),
            ])
        );
        assert!(decode_day(DAY, &json!("nope")).is_err());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = FlakyStore {
            failures: AtomicU32::new(2),
            ..FlakyStore::default()
        };
        let ledger = Ledger::with_retry(store, fast_retry(3));
        assert_eq!(ledger.add(DAY, &key("a.com"), 700).await.unwrap(), 700);
    }

    #[tokio::test]
    async fn persistent_failures_surface_after_last_attempt() {
        let store = FlakyStore {
            failures: AtomicU32::new(5),
            ..FlakyStore::default()
        };
        let ledger = Ledger::with_retry(store, fast_retry(2));
        let err = ledger.add(DAY, &key("a.com"), 700).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(ledger.store().failures.load(Ordering::SeqCst), 3);
    }
}
