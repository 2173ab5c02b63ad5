//! The attribution session: what is being watched right now, and since when.
//!
//! A start timestamp exists if and only if a target exists; both live in the
//! same `Option<Session>`, so the invariant holds by construction.

use chrono::{DateTime, Utc};

use crate::types::AttributionTarget;

/// An open session: a target plus the instant its clock last (re)started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub target: AttributionTarget,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Milliseconds since the session clock started, clamped at zero.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_milliseconds().max(0)
    }
}

/// Holder for at most one open session.
#[derive(Debug, Clone, Default)]
pub struct AttributionSession {
    current: Option<Session>,
}

impl AttributionSession {
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Replaces the target and starts its clock at `now`.
    ///
    /// Callers must flush the previous session first.
    pub fn begin(&mut self, target: AttributionTarget, now: DateTime<Utc>) {
        self.current = Some(Session {
            target,
            started_at: now,
        });
    }

    /// Elapsed milliseconds of the open session; zero when idle.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        self.current.as_ref().map_or(0, |s| s.elapsed_ms(now))
    }

    /// Closes the session, returning its target and elapsed time.
    pub fn end(&mut self, now: DateTime<Utc>) -> Option<(AttributionTarget, i64)> {
        self.current.take().map(|s| {
            let elapsed = s.elapsed_ms(now);
            (s.target, elapsed)
        })
    }

    /// Restarts the clock without touching the target. No-op when idle.
    pub fn restart(&mut self, now: DateTime<Utc>) {
        if let Some(session) = self.current.as_mut() {
            session.started_at = now;
        }
    }

    /// Replaces the tracked location in place and restarts the clock.
    pub fn update_location(&mut self, location: Option<String>, now: DateTime<Utc>) {
        if let Some(session) = self.current.as_mut() {
            session.target.location = location;
            session.started_at = now;
        }
    }

    pub const fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn target(&self) -> Option<&AttributionTarget> {
        self.current.as_ref().map(|s| &s.target)
    }

    pub const fn is_active(&self) -> bool {
        self.current.is_some()
    }
}
