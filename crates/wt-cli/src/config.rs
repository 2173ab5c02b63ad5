//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wt_core::{BrowserProfile, RetryPolicy, TrackerConfig};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Browser whose internal URL schemes are recognized.
    pub browser: BrowserProfile,
    /// Page exhausted tabs are redirected to.
    pub blocking_page: String,
    /// Intervals shorter than this many milliseconds are discarded.
    pub min_visit_ms: i64,
    pub flush_interval_secs: u64,
    pub limit_check_interval_secs: u64,
    /// Attempts per ledger write, including the first.
    pub flush_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Skip limit enforcement for domains the filter excludes.
    pub filter_suppresses_limits: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let tracker = TrackerConfig::default();
        Self {
            database_path: data_dir.join("wt.db"),
            browser: tracker.browser,
            blocking_page: tracker.blocking_page,
            min_visit_ms: tracker.min_visit_ms,
            flush_interval_secs: tracker.flush_interval.as_secs(),
            limit_check_interval_secs: tracker.limit_check_interval.as_secs(),
            flush_retries: tracker.retry.attempts,
            retry_base_delay_ms: u64::try_from(tracker.retry.base_delay.as_millis())
                .unwrap_or(u64::MAX),
            filter_suppresses_limits: tracker.filter_suppresses_limits,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (WT_*)
        figment = figment.merge(Env::prefixed("WT_"));

        figment.extract()
    }

    /// Tracker tunables derived from this configuration.
    ///
    /// Zero intervals are raised to one second; timers cannot tick at zero.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            browser: self.browser,
            blocking_page: self.blocking_page.clone(),
            min_visit_ms: self.min_visit_ms.max(0),
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            limit_check_interval: Duration::from_secs(self.limit_check_interval_secs.max(1)),
            filter_suppresses_limits: self.filter_suppresses_limits,
            retry: RetryPolicy {
                attempts: self.flush_retries.max(1),
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
        }
    }
}

/// Returns the platform-specific config directory for wt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wt"))
}

/// Returns the platform-specific data directory for wt.
///
/// On Linux: `~/.local/share/wt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("wt"))
}
