//! User-edited policy: daily limits, block flags and the tracking filter.
//!
//! All three live under fixed storage keys and persist until removed. Absent
//! or malformed values fall back to defaults (`all`, no limits, no blocking).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Items, KeyValueStore, StoreError, decode_lenient};
use crate::types::{AttributionKey, ValidationError};

/// Storage key for [`LimitConfig`].
pub const LIMITS_KEY: &str = "limits";
/// Storage key for [`BlockConfig`].
pub const BLOCKING_KEY: &str = "blocking";
/// Storage key for the filter mode.
pub const FILTER_MODE_KEY: &str = "filterMode";
/// Storage key for the filter domain list.
pub const FILTER_LIST_KEY: &str = "filterList";

/// Daily limits in minutes, keyed by attribution key.
pub type LimitConfig = BTreeMap<String, u64>;

/// Enforcement flags, keyed by attribution key.
pub type BlockConfig = BTreeMap<String, bool>;

/// Which domains get their time persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Track everything.
    #[default]
    All,
    /// Track only listed domains.
    Include,
    /// Track everything except listed domains.
    Exclude,
}

impl FilterMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            _ => Err(ValidationError::InvalidFilterMode {
                value: s.to_string(),
            }),
        }
    }
}

/// Filter mode plus its ordered domain list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    pub mode: FilterMode,
    pub list: Vec<String>,
}

impl FilterConfig {
    /// Whether time on `key` should be persisted.
    pub fn allows(&self, key: &AttributionKey) -> bool {
        let listed = self.list.iter().any(|d| d == key.as_str());
        match self.mode {
            FilterMode::All => true,
            FilterMode::Include => listed,
            FilterMode::Exclude => !listed,
        }
    }

    fn from_items(items: &Items) -> Self {
        Self {
            mode: decode_lenient(items, FILTER_MODE_KEY).unwrap_or_default(),
            list: decode_lenient(items, FILTER_LIST_KEY).unwrap_or_default(),
        }
    }
}

/// Snapshot of every policy key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub limits: LimitConfig,
    pub blocking: BlockConfig,
    pub filter: FilterConfig,
}

impl Policy {
    pub(crate) fn from_items(items: &Items) -> Self {
        Self {
            limits: decode_lenient(items, LIMITS_KEY).unwrap_or_default(),
            blocking: decode_lenient(items, BLOCKING_KEY).unwrap_or_default(),
            filter: FilterConfig::from_items(items),
        }
    }

    /// The positive limit (minutes) enforced on `key`, if blocking is on.
    pub fn enforced_limit(&self, key: &AttributionKey) -> Option<u64> {
        let blocking = self.blocking.get(key.as_str()).copied().unwrap_or(false);
        let limit = self.limits.get(key.as_str()).copied().unwrap_or(0);
        (blocking && limit > 0).then_some(limit)
    }
}

/// Reads the filter configuration.
pub async fn load_filter<S: KeyValueStore>(store: &S) -> Result<FilterConfig, StoreError> {
    let items = store.get(&[FILTER_MODE_KEY, FILTER_LIST_KEY]).await?;
    Ok(FilterConfig::from_items(&items))
}

/// Reads limits, blocking flags and the filter in one round trip.
pub async fn load_policy<S: KeyValueStore>(store: &S) -> Result<Policy, StoreError> {
    let items = store
        .get(&[LIMITS_KEY, BLOCKING_KEY, FILTER_MODE_KEY, FILTER_LIST_KEY])
        .await?;
    Ok(Policy::from_items(&items))
}

/// Sets the daily limit for `key`. A limit of zero removes it.
pub async fn set_limit<S: KeyValueStore>(
    store: &S,
    key: &AttributionKey,
    minutes: u64,
) -> Result<(), StoreError> {
    let mut limits = load_policy(store).await?.limits;
    if minutes == 0 {
        limits.remove(key.as_str());
    } else {
        limits.insert(key.to_string(), minutes);
    }
    write(store, LIMITS_KEY, &limits).await
}

/// Removes the limit and block flag for `key`.
pub async fn remove_limit<S: KeyValueStore>(
    store: &S,
    key: &AttributionKey,
) -> Result<(), StoreError> {
    let Policy {
        mut limits,
        mut blocking,
        ..
    } = load_policy(store).await?;
    limits.remove(key.as_str());
    blocking.remove(key.as_str());
    store
        .set(Items::from([
            (LIMITS_KEY.to_string(), encode(LIMITS_KEY, &limits)?),
            (BLOCKING_KEY.to_string(), encode(BLOCKING_KEY, &blocking)?),
        ]))
        .await
}

/// Turns enforcement for `key` on or off.
pub async fn set_blocking<S: KeyValueStore>(
    store: &S,
    key: &AttributionKey,
    enabled: bool,
) -> Result<(), StoreError> {
    let mut blocking = load_policy(store).await?.blocking;
    blocking.insert(key.to_string(), enabled);
    write(store, BLOCKING_KEY, &blocking).await
}

/// Sets the filter mode, keeping the list.
pub async fn set_filter_mode<S: KeyValueStore>(
    store: &S,
    mode: FilterMode,
) -> Result<(), StoreError> {
    write(store, FILTER_MODE_KEY, &mode).await
}

/// Appends `domain` to the filter list unless already present.
pub async fn add_filter_domain<S: KeyValueStore>(
    store: &S,
    domain: &str,
) -> Result<bool, StoreError> {
    let mut filter = load_filter(store).await?;
    if filter.list.iter().any(|d| d == domain) {
        return Ok(false);
    }
    filter.list.push(domain.to_string());
    write(store, FILTER_LIST_KEY, &filter.list).await?;
    Ok(true)
}

/// Removes `domain` from the filter list.
pub async fn remove_filter_domain<S: KeyValueStore>(
    store: &S,
    domain: &str,
) -> Result<bool, StoreError> {
    let mut filter = load_filter(store).await?;
    let before = filter.list.len();
    filter.list.retain(|d| d != domain);
    if filter.list.len() == before {
        return Ok(false);
    }
    write(store, FILTER_LIST_KEY, &filter.list).await?;
    Ok(true)
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

async fn write<S: KeyValueStore, T: Serialize>(
    store: &S,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = encode(key, value)?;
    store.set(Items::from([(key.to_string(), value)])).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::store::MemoryStore;

    fn key(s: &str) -> AttributionKey {
        AttributionKey::new(s).unwrap()
    }

    #[test]
    fn filter_modes() {
        let listed = key("example.com");
        let other = key("other.com");

        let all = FilterConfig::default();
        assert!(all.allows(&listed) && all.allows(&other));

        let include = FilterConfig {
            mode: FilterMode::Include,
            list: vec!["example.com".into()],
        };
        assert!(include.allows(&listed));
        assert!(!include.allows(&other));

        let exclude = FilterConfig {
            mode: FilterMode::Exclude,
            list: vec!["example.com".into()],
        };
        assert!(!exclude.allows(&listed));
        assert!(exclude.allows(&other));
    }

    #[test]
    fn filter_mode_from_str() {
        assert_eq!("exclude".parse::<FilterMode>().unwrap(), FilterMode::Exclude);
        assert!("sometimes".parse::<FilterMode>().is_err());
    }

    #[tokio::test]
    async fn absent_config_uses_defaults() {
        let store = MemoryStore::new();
        let policy = load_policy(&store).await.unwrap();
        assert_eq!(policy, Policy::default());
        assert_eq!(policy.filter.mode, FilterMode::All);
    }

    #[tokio::test]
    async fn malformed_config_is_treated_as_absent() {
        let store = MemoryStore::new();
        store
            .set(Items::from([
                (FILTER_MODE_KEY.to_string(), json!("bogus")),
                (LIMITS_KEY.to_string(), json!(["not", "a", "map"])),
            ]))
            .await
            .unwrap();
        let policy = load_policy(&store).await.unwrap();
        assert_eq!(policy.filter.mode, FilterMode::All);
        assert!(policy.limits.is_empty());
    }

    #[tokio::test]
    async fn enforced_limit_requires_flag_and_positive_limit() {
        let store = MemoryStore::new();
        let domain = key("example.com");

        set_limit(&store, &domain, 30).await.unwrap();
        assert_eq!(load_policy(&store).await.unwrap().enforced_limit(&domain), None);

        set_blocking(&store, &domain, true).await.unwrap();
        assert_eq!(load_policy(&store).await.unwrap().enforced_limit(&domain), Some(30));

        set_blocking(&store, &domain, false).await.unwrap();
        assert_eq!(load_policy(&store).await.unwrap().enforced_limit(&domain), None);
    }

    #[tokio::test]
    async fn limits_persist_in_browser_layout() {
        let store = MemoryStore::new();
        let domain = key("example.com");
        set_limit(&store, &domain, 30).await.unwrap();
        set_blocking(&store, &domain, true).await.unwrap();

        let items = store.get_all().await.unwrap();
        assert_eq!(items[LIMITS_KEY], json!({"example.com": 30}));
        assert_eq!(items[BLOCKING_KEY], json!({"example.com": true}));

        remove_limit(&store, &domain).await.unwrap();
        let items = store.get_all().await.unwrap();
        assert_eq!(items[LIMITS_KEY], json!({}));
        assert_eq!(items[BLOCKING_KEY], json!({}));
    }

    #[tokio::test]
    async fn filter_list_edits_keep_order_and_skip_duplicates() {
        let store = MemoryStore::new();
        assert!(add_filter_domain(&store, "b.com").await.unwrap());
        assert!(add_filter_domain(&store, "a.com").await.unwrap());
        assert!(!add_filter_domain(&store, "b.com").await.unwrap());
        set_filter_mode(&store, FilterMode::Include).await.unwrap();

        let filter = load_filter(&store).await.unwrap();
        assert_eq!(filter.mode, FilterMode::Include);
        assert_eq!(filter.list, vec!["b.com".to_string(), "a.com".to_string()]);

        assert!(remove_filter_domain(&store, "b.com").await.unwrap());
        assert!(!remove_filter_domain(&store, "b.com").await.unwrap());
        assert_eq!(load_filter(&store).await.unwrap().list, vec!["a.com".to_string()]);
    }
}
