//! Daily limit evaluation.

use crate::classify::ClassifiedPage;
use crate::policy::Policy;
use crate::types::TabId;

/// Milliseconds per minute of configured limit.
const MS_PER_MINUTE: i64 = 60_000;

/// Redirect a tab to the blocking page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAction {
    pub tab_id: TabId,
    pub url: String,
}

/// Decides whether a tab has exhausted its domain's daily allowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitEvaluator {
    blocking_page: String,
}

impl LimitEvaluator {
    pub fn new(blocking_page: impl Into<String>) -> Self {
        Self {
            blocking_page: blocking_page.into(),
        }
    }

    pub fn blocking_page(&self) -> &str {
        &self.blocking_page
    }

    /// Evaluates one tab.
    ///
    /// `stored_ms` is today's ledger total for the page's key and `in_flight_ms`
    /// the unflushed session time when the tab is the tracked one (zero
    /// otherwise). Blocks only web pages whose key has blocking enabled and a
    /// positive limit, and only once the total strictly exceeds that limit.
    pub fn evaluate(
        &self,
        tab_id: TabId,
        page: &ClassifiedPage,
        policy: &Policy,
        stored_ms: i64,
        in_flight_ms: i64,
    ) -> Option<BlockAction> {
        if !page.kind.is_blockable() {
            return None;
        }
        let limit_minutes = policy.enforced_limit(&page.key)?;
        let limit_ms = i64::try_from(limit_minutes)
            .unwrap_or(i64::MAX)
            .saturating_mul(MS_PER_MINUTE);
        let total_ms = stored_ms.saturating_add(in_flight_ms.max(0));

        (total_ms > limit_ms).then(|| BlockAction {
            tab_id,
            url: self.blocking_page.clone(),
        })
    }
}
