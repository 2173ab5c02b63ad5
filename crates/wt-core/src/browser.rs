//! The host browser as seen by the tracker: tab lookups and navigation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::limit::BlockAction;
use crate::types::{Tab, TabId, WindowId};

/// Browser API errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrowserError {
    /// The tab was closed before the request reached it.
    #[error("tab {0} no longer exists")]
    TabGone(TabId),
    /// Any other failure reported by the browser.
    #[error("browser request failed: {0}")]
    Request(String),
}

/// Tab/window operations the tracker needs from the host browser.
pub trait Browser: Send + Sync {
    /// Looks up a tab by id.
    fn get_tab(&self, tab_id: TabId) -> impl Future<Output = Result<Tab, BrowserError>> + Send;

    /// Lists the active tabs of a window (normally at most one).
    fn query_active_tabs(
        &self,
        window_id: WindowId,
    ) -> impl Future<Output = Result<Vec<Tab>, BrowserError>> + Send;

    /// Points a tab at `url`.
    fn navigate(&self, tab_id: TabId, url: &str)
    -> impl Future<Output = Result<(), BrowserError>> + Send;
}

#[derive(Debug, Default)]
struct MirrorState {
    tabs: BTreeMap<TabId, Tab>,
    outbox: Vec<BlockAction>,
}

/// An in-process mirror of the browser's tabs, fed from tab snapshots.
///
/// Navigations are applied to the mirrored tab and queued in an outbox for the
/// caller to forward to the real browser. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TabMirror {
    state: Arc<Mutex<MirrorState>>,
}

impl TabMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the latest snapshot of a tab.
    ///
    /// An active snapshot deactivates the other tabs of its window.
    pub fn upsert(&self, tab: Tab) {
        let mut state = self.lock();
        if tab.active {
            for other in state.tabs.values_mut() {
                if other.window_id == tab.window_id && other.id != tab.id {
                    other.active = false;
                }
            }
        }
        state.tabs.insert(tab.id, tab);
    }

    /// Marks `tab_id` as the active tab of its window.
    pub fn activate(&self, tab_id: TabId) -> bool {
        let mut state = self.lock();
        let Some(window_id) = state.tabs.get(&tab_id).map(|t| t.window_id) else {
            return false;
        };
        for tab in state.tabs.values_mut() {
            if tab.window_id == window_id {
                tab.active = tab.id == tab_id;
            }
        }
        true
    }

    /// Forgets a closed tab.
    pub fn remove(&self, tab_id: TabId) -> Option<Tab> {
        self.lock().tabs.remove(&tab_id)
    }

    pub fn tab(&self, tab_id: TabId) -> Option<Tab> {
        self.lock().tabs.get(&tab_id).cloned()
    }

    /// Drains navigations issued since the last call.
    pub fn take_navigations(&self) -> Vec<BlockAction> {
        std::mem::take(&mut self.lock().outbox)
    }
}

impl Browser for TabMirror {
    async fn get_tab(&self, tab_id: TabId) -> Result<Tab, BrowserError> {
        self.tab(tab_id).ok_or(BrowserError::TabGone(tab_id))
    }

    async fn query_active_tabs(&self, window_id: WindowId) -> Result<Vec<Tab>, BrowserError> {
        Ok(self
            .lock()
            .tabs
            .values()
            .filter(|t| t.window_id == window_id && t.active)
            .cloned()
            .collect())
    }

    async fn navigate(&self, tab_id: TabId, url: &str) -> Result<(), BrowserError> {
        let mut state = self.lock();
        let tab = state
            .tabs
            .get_mut(&tab_id)
            .ok_or(BrowserError::TabGone(tab_id))?;
        tab.url = Some(url.to_string());
        state.outbox.push(BlockAction {
            tab_id,
            url: url.to_string(),
        });
        Ok(())
    }
}
