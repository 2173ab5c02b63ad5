//! Live-status messages exchanged with the reporting layer.
//!
//! Request: `{"action": "getLiveStatus"}`. Response: `{"domain": ..., "timeAdded": ms}`
//! while a session is open, `{}` otherwise.

use serde::{Deserialize, Serialize};

/// A request from the reporting layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum StatusRequest {
    #[serde(rename = "getLiveStatus")]
    GetLiveStatus,
}

/// Unflushed time of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveStatus {
    #[serde(rename_all = "camelCase")]
    Tracking { domain: String, time_added: i64 },
    Idle {},
}

impl LiveStatus {
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle {})
    }
}
