//! Host command: runs the tracker over a JSON-lines event stream.
//!
//! The browser side (an extension's native-messaging bridge, or a recorded
//! session) writes one JSON object per line to stdin:
//!
//! - browser events tagged by `event` (`tabSnapshot`, `tabActivated`,
//!   `windowFocusChanged`, `tabUpdated`, `tabRemoved`, `flush`, `checkLimits`),
//!   optionally carrying an RFC 3339 `at` timestamp, honoured only in replay;
//! - live-status requests, `{"action": "getLiveStatus"}`.
//!
//! Responses and navigation commands are written to stdout, one per line.
//! End of input flushes the open session and exits.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use wt_core::{
    KeyValueStore, ManualClock, StatusRequest, Tab, TabId, TabMirror, Tracker, TrackerConfig,
    TrackerError, TrackerEvent, WindowId,
};

/// A browser event as received on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BrowserEvent {
    /// Latest state of a tab; sent for existing tabs at startup and for new tabs.
    TabSnapshot { tab: Tab },
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        tab: Option<Tab>,
    },
    WindowFocusChanged { window_id: Option<WindowId> },
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        tab: Tab,
    },
    TabRemoved { tab_id: TabId },
    /// Flush now, as the periodic timer would.
    Flush,
    /// Re-check limits now, as the periodic timer would.
    CheckLimits,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inbound {
    Request(StatusRequest),
    Event {
        event: BrowserEvent,
        at: Option<DateTime<Utc>>,
    },
}

fn parse_line(line: &str) -> Result<Inbound, serde_json::Error> {
    let mut value: Value = serde_json::from_str(line)?;
    if value.get("action").is_some() {
        return serde_json::from_value(value).map(Inbound::Request);
    }
    let at = match value.as_object_mut().and_then(|fields| fields.remove("at")) {
        Some(at) => Some(serde_json::from_value(at)?),
        None => None,
    };
    let event = serde_json::from_value(value)?;
    Ok(Inbound::Event { event, at })
}

/// Command sent back to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename = "navigate", rename_all = "camelCase")]
struct Navigate<'a> {
    tab_id: TabId,
    url: &'a str,
}

/// Counters reported when the host exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub events: u64,
    pub requests: u64,
    pub blocked: u64,
    pub errors: u64,
    pub malformed: u64,
}

/// Periodic flush and limit-check cadence.
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    pub flush: Duration,
    pub limits: Duration,
}

impl Timers {
    pub const fn from_config(config: &TrackerConfig) -> Self {
        Self {
            flush: config.flush_interval,
            limits: config.limit_check_interval,
        }
    }
}

struct Host<S> {
    tracker: Tracker<S, TabMirror, ManualClock>,
    mirror: TabMirror,
    clock: ManualClock,
    replay: bool,
    stats: HostStats,
}

impl<S: KeyValueStore> Host<S> {
    fn new(store: S, config: &TrackerConfig, replay: bool) -> Self {
        let mirror = TabMirror::new();
        let clock = ManualClock::new(Utc::now());
        let tracker = Tracker::new(store, mirror.clone(), clock.clone(), config);
        Self {
            tracker,
            mirror,
            clock,
            replay,
            stats: HostStats::default(),
        }
    }

    /// Replay follows the events' `at`; live mode follows the wall clock and
    /// ignores `at`.
    fn advance_clock(&self, at: Option<DateTime<Utc>>) {
        if !self.replay {
            self.clock.set(Utc::now());
        } else if let Some(at) = at {
            self.clock.set(at);
        }
    }

    async fn handle_line<W: AsyncWrite + Unpin>(&mut self, line: &str, out: &mut W) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match parse_line(line) {
            Ok(Inbound::Request(StatusRequest::GetLiveStatus)) => {
                self.stats.requests += 1;
                self.advance_clock(None);
                write_json(out, &self.tracker.live_status()).await?;
            }
            Ok(Inbound::Event { event, at }) => {
                self.stats.events += 1;
                self.advance_clock(at);
                let result = self.apply(event).await;
                self.record(result);
            }
            Err(error) => {
                self.stats.malformed += 1;
                tracing::warn!(%error, line, "ignoring malformed input line");
            }
        }
        self.drain(out).await
    }

    async fn apply(&mut self, event: BrowserEvent) -> Result<(), TrackerError> {
        match event {
            BrowserEvent::TabSnapshot { tab } => {
                self.mirror.upsert(tab);
                Ok(())
            }
            BrowserEvent::TabActivated { tab_id, tab } => {
                if let Some(tab) = tab {
                    self.mirror.upsert(tab);
                }
                self.mirror.activate(tab_id);
                self.tracker.handle(TrackerEvent::TabActivated { tab_id }).await
            }
            BrowserEvent::WindowFocusChanged { window_id } => {
                self.tracker
                    .handle(TrackerEvent::WindowFocusChanged { window_id })
                    .await
            }
            BrowserEvent::TabUpdated { tab_id, url, tab } => {
                self.mirror.upsert(tab.clone());
                self.tracker
                    .handle(TrackerEvent::TabUpdated { tab_id, url, tab })
                    .await
            }
            BrowserEvent::TabRemoved { tab_id } => {
                self.mirror.remove(tab_id);
                Ok(())
            }
            BrowserEvent::Flush => self.tracker.handle(TrackerEvent::FlushTick).await,
            BrowserEvent::CheckLimits => self.tracker.handle(TrackerEvent::LimitTick).await,
        }
    }

    async fn tick<W: AsyncWrite + Unpin>(&mut self, event: TrackerEvent, out: &mut W) -> Result<()> {
        self.advance_clock(None);
        let result = self.tracker.handle(event).await;
        self.record(result);
        self.drain(out).await
    }

    fn record(&mut self, result: Result<(), TrackerError>) {
        if let Err(error) = result {
            self.stats.errors += 1;
            tracing::error!(%error, "event handling failed");
        }
    }

    /// Forwards queued navigations to the browser.
    async fn drain<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> Result<()> {
        for action in self.mirror.take_navigations() {
            self.stats.blocked += 1;
            let message = Navigate {
                tab_id: action.tab_id,
                url: &action.url,
            };
            write_json(out, &message).await?;
        }
        Ok(())
    }

    async fn shutdown<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> Result<()> {
        self.advance_clock(None);
        match self.tracker.shutdown().await {
            Ok(outcome) => tracing::debug!(?outcome, "final flush"),
            Err(error) => {
                self.stats.errors += 1;
                tracing::error!(%error, "final flush failed");
            }
        }
        self.drain(out).await
    }
}

async fn write_json<W: AsyncWrite + Unpin, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value).context("failed to serialize message")?;
    line.push(b'\n');
    out.write_all(&line).await.context("failed to write message")?;
    out.flush().await.context("failed to flush output")?;
    Ok(())
}

/// Runs the tracker until `input` ends.
///
/// With `timers` set, periodic flushes and limit checks run on wall-clock
/// intervals alongside the input.
pub async fn run<S, R, W>(
    store: S,
    config: &TrackerConfig,
    replay: bool,
    timers: Option<Timers>,
    input: R,
    output: &mut W,
) -> Result<HostStats>
where
    S: KeyValueStore,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut host = Host::new(store, config, replay);
    let mut lines = input.lines();

    let enabled = timers.is_some();
    let cadence = timers.unwrap_or_else(|| Timers::from_config(config));
    let start = Instant::now();
    let mut flush_timer = interval_at(start + cadence.flush, cadence.flush);
    let mut limit_timer = interval_at(start + cadence.limits, cadence.limits);
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    limit_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(replay, timers = enabled, "host started");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read input")? {
                    Some(line) => host.handle_line(&line, output).await?,
                    None => break,
                }
            }
            _ = flush_timer.tick(), if enabled => {
                host.tick(TrackerEvent::FlushTick, output).await?;
            }
            _ = limit_timer.tick(), if enabled => {
                host.tick(TrackerEvent::LimitTick, output).await?;
            }
        }
    }

    host.shutdown(output).await?;
    tracing::info!(stats = ?host.stats, "host stopped");
    Ok(host.stats)
}

/// Path of the lock file guarding the database at `database_path`.
pub fn lock_path(database_path: &Path) -> PathBuf {
    database_path.with_extension("lock")
}

/// Takes the single-host lock for a database. Held until the file is dropped.
pub fn acquire_lock(database_path: &Path) -> Result<File> {
    let path = lock_path(database_path);
    let file = File::create(&path)
        .with_context(|| format!("failed to create lock file {}", path.display()))?;
    file.try_lock_exclusive()
        .context("another `wt host` is already running for this database")?;
    Ok(file)
}
