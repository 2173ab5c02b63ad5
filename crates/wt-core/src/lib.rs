//! Core domain logic for the web time tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Classification: mapping tab locations to attribution keys
//! - Tracking: the focus state machine that turns browser events into ledger updates
//! - Limits: daily allowances and blocking of exhausted domains
//! - Reporting: daily/monthly rollups and the live-status query

pub mod browser;
pub mod classify;
pub mod clock;
pub mod ledger;
pub mod limit;
pub mod policy;
pub mod rollup;
pub mod session;
pub mod status;
pub mod store;
pub mod tracker;
pub mod types;

pub use browser::{Browser, BrowserError, TabMirror};
pub use classify::{BrowserProfile, ClassifiedPage, Classifier, PageKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{
    DayTotals, Ledger, RetryPolicy, date_key, date_key_for, decode_day, parse_date_key,
};
pub use limit::{BlockAction, LimitEvaluator};
pub use policy::{FilterConfig, FilterMode, Policy};
pub use rollup::{Period, Rollup, RollupEntry, load_rollup};
pub use session::{AttributionSession, Session};
pub use status::{LiveStatus, StatusRequest};
pub use store::{Items, KeyValueStore, MemoryStore, StoreError};
pub use tracker::{FlushOutcome, Tracker, TrackerConfig, TrackerError, TrackerEvent, TrackerState};
pub use types::{AttributionKey, AttributionTarget, Tab, TabId, ValidationError, WindowId};
