//! The active attribution tracker.
//!
//! A two-state machine (`Idle`, `Tracking`) driven by [`TrackerEvent`]s. Every
//! handler takes `&mut self`, so events are processed one at a time to
//! completion, and every transition flushes the previous session before a new
//! one begins. A flush converts the session's elapsed time into a ledger update
//! and always restarts the session clock, whether or not the time was kept.
//!
//! Tab activations count only in the focused window. While every window has
//! lost focus they are ignored; before the first focus event the activated
//! tab's window is taken as focused.
//!
//! Store failures never leave the machine half-transitioned: the transition
//! completes, the unflushed interval is dropped, and the error is returned to
//! the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::browser::{Browser, BrowserError};
use crate::classify::{BrowserProfile, Classifier};
use crate::clock::Clock;
use crate::ledger::{Ledger, RetryPolicy, date_key};
use crate::limit::{BlockAction, LimitEvaluator};
use crate::policy;
use crate::session::{AttributionSession, Session};
use crate::status::LiveStatus;
use crate::store::{KeyValueStore, StoreError};
use crate::types::{AttributionKey, AttributionTarget, Tab, TabId, WindowId};

/// Tracker errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Focus-changing input from the host browser, plus the two periodic ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The active tab of a window changed.
    TabActivated { tab_id: TabId },
    /// A window gained focus, or every window lost it (`None`).
    WindowFocusChanged { window_id: Option<WindowId> },
    /// A tab changed; `url` is set only when its location changed.
    TabUpdated {
        tab_id: TabId,
        url: Option<String>,
        tab: Tab,
    },
    /// Persist elapsed time without ending the session.
    FlushTick,
    /// Re-check limits for the tracked tab without flushing.
    LimitTick,
}

/// Tunables for a [`Tracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub browser: BrowserProfile,
    /// URL tabs are redirected to once their domain's limit is exceeded.
    pub blocking_page: String,
    /// Intervals shorter than this are discarded as tab flicker.
    pub min_visit_ms: i64,
    /// Cadence of [`TrackerEvent::FlushTick`].
    pub flush_interval: Duration,
    /// Cadence of [`TrackerEvent::LimitTick`].
    pub limit_check_interval: Duration,
    /// Skip limit enforcement for domains the filter excludes from tracking.
    pub filter_suppresses_limits: bool,
    pub retry: RetryPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            browser: BrowserProfile::Firefox,
            blocking_page: "moz-extension://web-time/blocked.html".to_string(),
            min_visit_ms: 1000,
            flush_interval: Duration::from_secs(60),
            limit_check_interval: Duration::from_secs(5),
            filter_suppresses_limits: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Whether a session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking { tab_id: TabId },
}

/// What a flush did with the elapsed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No session was open.
    Idle,
    /// The interval was added to the ledger.
    Recorded {
        key: AttributionKey,
        ms: i64,
        total_ms: i64,
    },
    /// The filter excludes the key; the interval was dropped.
    Filtered { key: AttributionKey, ms: i64 },
    /// The interval was shorter than the minimum visit; dropped.
    BelowThreshold { key: AttributionKey, ms: i64 },
}

/// What the tracker knows about browser window focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowFocus {
    /// No focus event seen yet. The first activated tab's window is adopted.
    Unknown,
    /// Every window lost focus.
    Lost,
    Window(WindowId),
}

/// The attribution state machine.
#[derive(Debug)]
pub struct Tracker<S, B, C> {
    ledger: Ledger<S>,
    browser: B,
    clock: C,
    classifier: Classifier,
    evaluator: LimitEvaluator,
    session: AttributionSession,
    focus: WindowFocus,
    min_visit_ms: i64,
    filter_suppresses_limits: bool,
}

impl<S, B, C> Tracker<S, B, C>
where
    S: KeyValueStore,
    B: Browser,
    C: Clock,
{
    pub fn new(store: S, browser: B, clock: C, config: &TrackerConfig) -> Self {
        Self {
            ledger: Ledger::with_retry(store, config.retry),
            browser,
            clock,
            classifier: Classifier::new(config.browser),
            evaluator: LimitEvaluator::new(config.blocking_page.clone()),
            session: AttributionSession::new(),
            focus: WindowFocus::Unknown,
            min_visit_ms: config.min_visit_ms,
            filter_suppresses_limits: config.filter_suppresses_limits,
        }
    }

    pub const fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub const fn browser(&self) -> &B {
        &self.browser
    }

    pub fn state(&self) -> TrackerState {
        self.session
            .target()
            .map_or(TrackerState::Idle, |t| TrackerState::Tracking { tab_id: t.tab_id })
    }

    pub const fn focused_window(&self) -> Option<WindowId> {
        match self.focus {
            WindowFocus::Window(window_id) => Some(window_id),
            WindowFocus::Unknown | WindowFocus::Lost => None,
        }
    }

    pub const fn session(&self) -> Option<&Session> {
        self.session.current()
    }

    /// Routes one event to its handler.
    pub async fn handle(&mut self, event: TrackerEvent) -> Result<(), TrackerError> {
        let now = self.clock.now();
        tracing::trace!(?event, "handling event");
        match event {
            TrackerEvent::TabActivated { tab_id } => self.on_tab_activated(tab_id, now).await,
            TrackerEvent::WindowFocusChanged { window_id } => {
                self.on_window_focus_changed(window_id, now).await
            }
            TrackerEvent::TabUpdated { tab_id, url, tab } => {
                self.on_tab_updated(tab_id, url, &tab, now).await
            }
            TrackerEvent::FlushTick => self.flush_at(now).await.map(drop),
            TrackerEvent::LimitTick => self.on_limit_tick().await,
        }
    }

    /// Flushes the open session into the ledger, keeping it open.
    pub async fn flush(&mut self) -> Result<FlushOutcome, TrackerError> {
        let now = self.clock.now();
        self.flush_at(now).await
    }

    /// Flushes and closes the session. Used on shutdown.
    pub async fn shutdown(&mut self) -> Result<FlushOutcome, TrackerError> {
        let now = self.clock.now();
        let flushed = self.flush_at(now).await;
        self.go_idle(now, "shutdown");
        flushed
    }

    /// Unflushed time of the open session. Pure read.
    pub fn live_status(&self) -> LiveStatus {
        match self.session.current() {
            None => LiveStatus::Idle {},
            Some(session) => LiveStatus::Tracking {
                domain: self.classifier.classify(session.target.location()).to_string(),
                time_added: session.elapsed_ms(self.clock.now()),
            },
        }
    }

    /// Evaluates the daily limit for a tab without acting on it.
    pub async fn evaluate(
        &self,
        tab_id: TabId,
        location: Option<&str>,
    ) -> Result<Option<BlockAction>, TrackerError> {
        let page = self.classifier.classify_page(location);
        if !page.kind.is_blockable() {
            return Ok(None);
        }

        let policy = policy::load_policy(self.ledger.store()).await?;
        if policy.enforced_limit(&page.key).is_none() {
            return Ok(None);
        }
        if self.filter_suppresses_limits && !policy.filter.allows(&page.key) {
            return Ok(None);
        }

        let now = self.clock.now();
        let stored_ms = self.ledger.total(&date_key(now), &page.key).await?;
        let in_flight_ms = match self.session.current() {
            Some(session) if session.target.tab_id == tab_id => session.elapsed_ms(now),
            _ => 0,
        };

        Ok(self
            .evaluator
            .evaluate(tab_id, &page, &policy, stored_ms, in_flight_ms))
    }

    async fn on_window_focus_changed(
        &mut self,
        window_id: Option<WindowId>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let flushed = self.flush_at(now).await;
        self.focus = window_id.map_or(WindowFocus::Lost, WindowFocus::Window);

        let Some(window_id) = window_id else {
            self.go_idle(now, "no window focused");
            return flushed.map(drop);
        };

        let active = match self.browser.query_active_tabs(window_id).await {
            Ok(tabs) => tabs.into_iter().find(|t| t.window_id == window_id),
            Err(error) => {
                tracing::debug!(window = %window_id, %error, "active tab query failed");
                None
            }
        };

        let enforced = match active {
            Some(tab) => self.begin(&tab, now).await,
            None => {
                self.go_idle(now, "focused window has no active tab");
                Ok(())
            }
        };
        flushed.map(drop).and(enforced)
    }

    async fn on_tab_activated(
        &mut self,
        tab_id: TabId,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        if self.focus == WindowFocus::Lost {
            tracing::debug!(tab = %tab_id, "tab activated while no window has focus");
            return Ok(());
        }

        let flushed = self.flush_at(now).await;

        let resolved = match self.browser.get_tab(tab_id).await {
            Ok(tab) if tab.id == tab_id => Some(tab),
            Ok(tab) => {
                tracing::debug!(requested = %tab_id, returned = %tab.id, "lookup returned another tab");
                None
            }
            Err(error) => {
                tracing::debug!(tab = %tab_id, %error, "tab vanished before lookup completed");
                None
            }
        };

        let enforced = match (resolved, self.focus) {
            (Some(tab), WindowFocus::Window(focused)) if tab.window_id != focused => {
                tracing::debug!(
                    tab = %tab_id,
                    window = %tab.window_id,
                    %focused,
                    "tab activated in an unfocused window"
                );
                Ok(())
            }
            (Some(tab), _) => {
                self.focus = WindowFocus::Window(tab.window_id);
                self.begin(&tab, now).await
            }
            (None, _) => {
                self.go_idle(now, "activated tab could not be resolved");
                Ok(())
            }
        };
        flushed.map(drop).and(enforced)
    }

    async fn on_tab_updated(
        &mut self,
        tab_id: TabId,
        url: Option<String>,
        tab: &Tab,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let Some(url) = url else {
            return Ok(());
        };

        let tracked = self.session.target().is_some_and(|t| t.tab_id == tab_id);
        if !tracked {
            return self.enforce(tab_id, Some(&url)).await;
        }

        let flushed = self.flush_at(now).await;
        tracing::debug!(tab = %tab_id, window = %tab.window_id, %url, "tracked tab navigated");
        self.session.update_location(Some(url.clone()), now);
        let enforced = self.enforce(tab_id, Some(&url)).await;
        flushed.map(drop).and(enforced)
    }

    async fn on_limit_tick(&self) -> Result<(), TrackerError> {
        let Some(target) = self.session.target() else {
            return Ok(());
        };
        self.enforce(target.tab_id, target.location()).await
    }

    /// Starts a session on `tab` and checks its limit.
    async fn begin(&mut self, tab: &Tab, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let target = AttributionTarget::from(tab);
        tracing::debug!(
            tab = %target.tab_id,
            key = %self.classifier.classify(target.location()),
            "tracking"
        );
        self.session.begin(target, now);
        self.enforce(tab.id, tab.url.as_deref()).await
    }

    fn go_idle(&mut self, now: DateTime<Utc>, reason: &'static str) {
        if let Some((target, unflushed_ms)) = self.session.end(now) {
            tracing::debug!(tab = %target.tab_id, unflushed_ms, reason, "idle");
        }
    }

    async fn enforce(&self, tab_id: TabId, location: Option<&str>) -> Result<(), TrackerError> {
        let Some(action) = self.evaluate(tab_id, location).await? else {
            return Ok(());
        };
        tracing::info!(tab = %action.tab_id, url = %action.url, "daily limit exceeded, blocking tab");
        self.browser.navigate(action.tab_id, &action.url).await?;
        Ok(())
    }

    async fn flush_at(&mut self, now: DateTime<Utc>) -> Result<FlushOutcome, TrackerError> {
        let Some(session) = self.session.current() else {
            return Ok(FlushOutcome::Idle);
        };
        let key = self.classifier.classify(session.target.location());
        let ms = session.elapsed_ms(now);

        let outcome = self.commit(key, ms, now).await;
        self.session.restart(now);

        match &outcome {
            Ok(outcome) => tracing::debug!(?outcome, "flushed"),
            Err(error) => tracing::error!(%error, ms, "flush failed, interval dropped"),
        }
        outcome
    }

    async fn commit(
        &self,
        key: AttributionKey,
        ms: i64,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome, TrackerError> {
        let filter = policy::load_filter(self.ledger.store()).await?;
        if !filter.allows(&key) {
            return Ok(FlushOutcome::Filtered { key, ms });
        }
        if ms <= 0 || ms < self.min_visit_ms {
            return Ok(FlushOutcome::BelowThreshold { key, ms });
        }
        let total_ms = self.ledger.add(&date_key(now), &key, ms).await?;
        Ok(FlushOutcome::Recorded { key, ms, total_ms })
    }
}
