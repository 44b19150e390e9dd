//! The request-facing page server.
//!
//! Resolves the user's history, ensures enough recommendations are cached
//! (expanding synchronously at most once per request), slices the requested
//! window, and fires the prefetch check as a non-blocking side effect. Every
//! failure path degrades to a smaller-than-ideal but valid page; nothing
//! here is fatal to the request.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    db::Store,
    error::AppResult,
    models::{CatalogEntry, CatalogScope, GenerationKey, HistorySnapshot},
    services::{
        coordinator::{ExpandError, GenerationCoordinator},
        freshness,
        history::HistoryProvider,
        prefetch::PrefetchScheduler,
    },
};

/// Fixed catalog page length; skip values are floored to page boundaries
pub const PAGE_SIZE: usize = 15;

pub struct CatalogService {
    store: Arc<dyn Store>,
    history_provider: Arc<dyn HistoryProvider>,
    coordinator: Arc<GenerationCoordinator>,
    prefetch: PrefetchScheduler,
    history_ttl: Duration,
    recommendation_ttl: Duration,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn Store>,
        history_provider: Arc<dyn HistoryProvider>,
        coordinator: Arc<GenerationCoordinator>,
        prefetch: PrefetchScheduler,
        history_ttl: Duration,
        recommendation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            history_provider,
            coordinator,
            prefetch,
            history_ttl,
            recommendation_ttl,
        }
    }

    /// Serves one catalog page
    ///
    /// `skip` is floored to the nearest page boundary. Out-of-range skips
    /// yield an empty page; an empty first page yields a single placeholder
    /// entry describing the problem instead of a blank screen.
    pub async fn get_page(
        &self,
        user_id: &str,
        content_type: &str,
        category_id: &str,
        skip: usize,
    ) -> AppResult<Vec<CatalogEntry>> {
        let skip = skip - skip % PAGE_SIZE;
        let scope = CatalogScope::parse(category_id);
        let key = GenerationKey::new(user_id, scope);

        let history = self.resolve_history(user_id).await?;
        if history.items.is_empty() {
            tracing::info!(user_id = %user_id, "No watch history, serving setup notice");
            if skip == 0 {
                return Ok(vec![CatalogEntry::notice(
                    content_type,
                    "Watch history required",
                    "Recommendations are generated from your watch history, and none was \
                     found for this account. Connect a history source and reload.",
                )]);
            }
            return Ok(Vec::new());
        }

        let fingerprint = freshness::history_fingerprint(&history);
        let now = Utc::now();

        // A stale or fingerprint-mismatched list is treated as empty; the
        // expansion below rebuilds it from the current history.
        let mut items = match self.store.load_recommendations(&key).await? {
            Some(list)
                if freshness::is_list_usable(&list, &fingerprint, self.recommendation_ttl, now) =>
            {
                list.items
            }
            _ => Vec::new(),
        };

        // At most one synchronous expansion per page request, so an
        // exhausted or failing backend cannot stall the page in a loop.
        let wanted = skip.saturating_add(PAGE_SIZE);
        let mut expansion_failed = false;
        if items.len() < wanted {
            match self.coordinator.expand(&key, &history).await {
                Ok(list) => items = list.items.clone(),
                Err(ExpandError::NoBackend) if items.is_empty() && skip == 0 => {
                    return Ok(vec![CatalogEntry::notice(
                        content_type,
                        "Generation backend not configured",
                        "No generation backend credentials are available. Set \
                         GENERATION_API_KEYS to enable recommendations.",
                    )]);
                }
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        cached = items.len(),
                        "Expansion failed, serving cached items"
                    );
                    expansion_failed = true;
                }
            }
        }

        let end = wanted.min(items.len());
        let entries: Vec<CatalogEntry> = if skip < items.len() {
            items[skip..end]
                .iter()
                .map(|item| CatalogEntry::from_recommendation(item, content_type))
                .collect()
        } else {
            Vec::new()
        };

        // No prefetch on the heels of a failed expansion: the next page
        // request retries, not this one's background path.
        if !expansion_failed {
            self.prefetch
                .after_page_served(&key, items.len(), end, &history);
        }

        if entries.is_empty() && skip == 0 {
            return Ok(vec![CatalogEntry::notice(
                content_type,
                "No recommendations yet",
                "The generation backend did not return any recommendations for this \
                 catalog. Try again in a moment.",
            )]);
        }

        Ok(entries)
    }

    /// Resolves a usable history snapshot for the user
    ///
    /// Serves the stored snapshot while fresh; otherwise re-fetches and
    /// persists. A provider failure falls back to the stale snapshot (serve
    /// stale rather than fail the page) or, lacking one, an empty snapshot.
    async fn resolve_history(&self, user_id: &str) -> AppResult<Arc<HistorySnapshot>> {
        let stored = self.store.load_history(user_id).await?;
        let now = Utc::now();

        if let Some(snapshot) = &stored {
            if freshness::is_history_fresh(snapshot, self.history_ttl, now) {
                return Ok(Arc::new(snapshot.clone()));
            }
        }

        match self.history_provider.fetch_history(user_id).await {
            Ok(items) => {
                let snapshot = HistorySnapshot {
                    user_id: user_id.to_string(),
                    items,
                    fetched_at: now,
                };
                self.store.save_history(&snapshot).await?;
                Ok(Arc::new(snapshot))
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "History fetch failed");
                match stored {
                    Some(stale) => {
                        tracing::debug!(user_id = %user_id, "Serving stale history snapshot");
                        Ok(Arc::new(stale))
                    }
                    None => Ok(Arc::new(HistorySnapshot::empty(user_id, now))),
                }
            }
        }
    }
}
