//! Threshold-based background prefetch.
//!
//! After a page is served, the scheduler looks at how many cached items
//! remain past the end of that page. When inventory is about to run out it
//! dispatches a background expansion so the next pages are already cached by
//! the time the client asks for them. The triggering request never waits on
//! this work and never sees its failures.

use std::sync::Arc;

use crate::{
    models::{GenerationKey, HistorySnapshot},
    services::coordinator::GenerationCoordinator,
};

/// Unserved items below which a background expansion is dispatched
pub const PREFETCH_THRESHOLD: usize = 30;

pub struct PrefetchScheduler {
    coordinator: Arc<GenerationCoordinator>,
    threshold: usize,
}

impl PrefetchScheduler {
    pub fn new(coordinator: Arc<GenerationCoordinator>) -> Self {
        Self {
            coordinator,
            threshold: PREFETCH_THRESHOLD,
        }
    }

    #[cfg(test)]
    pub fn with_threshold(coordinator: Arc<GenerationCoordinator>, threshold: usize) -> Self {
        Self {
            coordinator,
            threshold,
        }
    }

    /// Fires a non-blocking expansion if inventory past `end` is low
    ///
    /// `list_len` is the cached list length, `end` the index just past the
    /// last served item. The coordinator's registry makes this a no-op when
    /// an expansion is already in flight for the key.
    pub fn after_page_served(
        &self,
        key: &GenerationKey,
        list_len: usize,
        end: usize,
        history: &Arc<HistorySnapshot>,
    ) {
        let remaining = list_len.saturating_sub(end);
        if remaining >= self.threshold {
            return;
        }

        tracing::debug!(
            key = %key,
            remaining,
            threshold = self.threshold,
            "Inventory low, dispatching background expansion"
        );

        self.coordinator
            .spawn_expansion(key.clone(), Arc::clone(history), "low inventory");
    }
}
