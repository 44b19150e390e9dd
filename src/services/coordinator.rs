//! Single-flight generation coordinator.
//!
//! All expansion of a recommendation list funnels through here: at most one
//! generation call is in flight per `GenerationKey` at any instant. Callers
//! that need an expansion already in progress await the in-flight call's
//! broadcast outcome instead of dispatching a duplicate. Background triggers
//! (threshold prefetch and the chained follow-up after a first batch) use the
//! same registry and simply no-op when a round is already running.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::sync::broadcast;

use crate::{
    db::Store,
    models::{CatalogScope, GenerationKey, HistorySnapshot, RecommendationList},
    services::{batching, freshness, providers::GeneratorPool},
};

/// Fraction of the requested batch that must be filled before the chained
/// follow-up expansion is dispatched: 4/5 of the request
const CHAIN_FILL_NUM: usize = 4;
const CHAIN_FILL_DEN: usize = 5;

/// Failure of one generation round
///
/// Cloneable so a coalesced outcome can fan out to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpandError {
    #[error("no generation backend is configured")]
    NoBackend,

    #[error("generation backend failed: {0}")]
    Backend(String),

    #[error("failed to persist recommendations: {0}")]
    Store(String),
}

/// Shared outcome of one generation round
pub type ExpandResult = Result<Arc<RecommendationList>, ExpandError>;

enum Role {
    /// This caller dispatches the generation call and broadcasts the outcome
    Leader(broadcast::Sender<ExpandResult>),
    /// Another caller is already generating; await its broadcast
    Waiter(broadcast::Receiver<ExpandResult>),
}

pub struct GenerationCoordinator {
    store: Arc<dyn Store>,
    generators: Arc<GeneratorPool>,
    recommendation_ttl: Duration,
    in_flight: Mutex<HashMap<GenerationKey, broadcast::Sender<ExpandResult>>>,
}

impl GenerationCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        generators: Arc<GeneratorPool>,
        recommendation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            generators,
            recommendation_ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// True while a generation round is running for the key
    pub fn is_in_flight(&self, key: &GenerationKey) -> bool {
        self.registry().contains_key(key)
    }

    /// Expands the recommendation list for `key`, coalescing with any round
    /// already in flight
    ///
    /// Returns the full merged list after the round this caller joined or
    /// led. A failed round resolves every waiter with the same error; it is
    /// never retried here and never leaves a partially persisted list.
    ///
    /// The round itself always runs as a task on the runtime, never inside
    /// this future: a caller that disconnects mid-generation only abandons
    /// its broadcast subscription, while the round finishes, clears its
    /// registry entry, and resolves the remaining waiters.
    pub async fn expand(
        self: &Arc<Self>,
        key: &GenerationKey,
        history: &Arc<HistorySnapshot>,
    ) -> ExpandResult {
        let mut rx = match self.join_or_lead(key) {
            Role::Waiter(rx) => rx,
            Role::Leader(tx) => {
                let rx = tx.subscribe();
                self.run_detached(key.clone(), Arc::clone(history), tx, "page request");
                rx
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            // The round's task ended without broadcasting; treat it as a
            // failed round rather than propagating a channel error.
            Err(_) => Err(ExpandError::Backend(
                "expansion ended without a result".to_string(),
            )),
        }
    }

    /// Fire-and-forget expansion for background triggers
    ///
    /// No-ops when a round is already in flight for the key, so simultaneous
    /// triggers (chained follow-up, low-inventory prefetch, a concurrent page
    /// request) collapse into the one running call. Failures are logged and
    /// swallowed; nothing awaits this work.
    pub fn spawn_expansion(
        self: &Arc<Self>,
        key: GenerationKey,
        history: Arc<HistorySnapshot>,
        trigger: &'static str,
    ) {
        match self.join_or_lead(&key) {
            Role::Leader(tx) => self.run_detached(key, history, tx, trigger),
            Role::Waiter(_) => {
                tracing::debug!(key = %key, trigger, "Expansion already in flight, skipping");
            }
        }
    }

    /// Runs the led round (and any chained follow-up) as a detached task
    ///
    /// The task owns its registry entry end to end, so cleanup and the
    /// waiter broadcast never depend on the triggering caller staying alive.
    fn run_detached(
        self: &Arc<Self>,
        key: GenerationKey,
        history: Arc<HistorySnapshot>,
        tx: broadcast::Sender<ExpandResult>,
        trigger: &'static str,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tx = tx;
            loop {
                let (outcome, chain) = this.lead_round(&key, &history, tx).await;
                match outcome {
                    Ok(list) => {
                        tracing::debug!(
                            key = %key,
                            trigger,
                            total = list.items.len(),
                            "Expansion round completed"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, trigger, error = %e, "Expansion round failed");
                        break;
                    }
                }
                if !chain {
                    break;
                }
                // A round can request one follow-up; re-register before
                // running it so other callers coalesce onto this task.
                tx = match this.join_or_lead(&key) {
                    Role::Leader(tx) => tx,
                    Role::Waiter(_) => break,
                };
            }
        });
    }

    /// One atomic check-or-insert on the in-flight registry
    ///
    /// Holding the lock across both the lookup and the insert closes the
    /// check-then-act race where two callers both observe "absent" and both
    /// dispatch.
    fn join_or_lead(&self, key: &GenerationKey) -> Role {
        let mut in_flight = self.registry();
        match in_flight.get(key) {
            Some(tx) => Role::Waiter(tx.subscribe()),
            None => {
                let (tx, _) = broadcast::channel(1);
                in_flight.insert(key.clone(), tx.clone());
                Role::Leader(tx)
            }
        }
    }

    /// Runs one generation round as the leader and releases all waiters
    ///
    /// Returns the shared outcome plus whether a chained follow-up round
    /// should be dispatched.
    async fn lead_round(
        &self,
        key: &GenerationKey,
        history: &HistorySnapshot,
        tx: broadcast::Sender<ExpandResult>,
    ) -> (ExpandResult, bool) {
        let (outcome, chain) = match self.run_generation(key, history).await {
            Ok((list, chain)) => (Ok(list), chain),
            Err(e) => (Err(e), false),
        };

        // Remove the registry entry before broadcasting so the handle is
        // never left dangling; a caller arriving after removal leads a fresh
        // round against the already-updated list.
        self.registry().remove(key);
        let _ = tx.send(outcome.clone());

        (outcome, chain)
    }

    /// Dispatches one generation call and persists the merged list
    async fn run_generation(
        &self,
        key: &GenerationKey,
        history: &HistorySnapshot,
    ) -> Result<(Arc<RecommendationList>, bool), ExpandError> {
        let fingerprint = freshness::history_fingerprint(history);
        let now = Utc::now();

        let current = self
            .store
            .load_recommendations(key)
            .await
            .map_err(|e| ExpandError::Store(e.to_string()))?;

        // A stale or mismatched list is logically empty; it is overwritten
        // by this round's persist rather than eagerly purged.
        let mut items = match current {
            Some(list)
                if freshness::is_list_usable(&list, &fingerprint, self.recommendation_ttl, now) =>
            {
                list.items
            }
            _ => Vec::new(),
        };

        let first_batch = items.is_empty();
        let requested = batching::next_batch_size(items.len());

        let mut exclude: HashSet<String> =
            items.iter().map(|item| item.content_id.clone()).collect();
        if let CatalogScope::SimilarTo(seed) = &key.scope {
            exclude.insert(seed.clone());
        }

        let backend = self.generators.next().ok_or(ExpandError::NoBackend)?;

        tracing::info!(
            key = %key,
            requested,
            cached = items.len(),
            backend = backend.name(),
            "Dispatching generation call"
        );

        let batch = backend
            .generate(history, &exclude, requested, &key.scope)
            .await
            .map_err(|e| ExpandError::Backend(e.to_string()))?;

        // Backends may ignore the exclusion list; filter again before
        // persisting so content ids stay unique within the list.
        let mut fresh = 0usize;
        for item in batch.items {
            if exclude.contains(&item.content_id) {
                continue;
            }
            exclude.insert(item.content_id.clone());
            items.push(item);
            fresh += 1;
        }

        let list = RecommendationList {
            key: key.clone(),
            items,
            source_fingerprint: fingerprint,
            updated_at: now,
        };

        self.store
            .save_recommendations(&list)
            .await
            .map_err(|e| ExpandError::Store(e.to_string()))?;

        tracing::debug!(
            key = %key,
            fresh,
            total = list.items.len(),
            "Persisted merged recommendation list"
        );

        let chain = first_batch && fresh * CHAIN_FILL_DEN >= requested * CHAIN_FILL_NUM;
        Ok((Arc::new(list), chain))
    }

    fn registry(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<GenerationKey, broadcast::Sender<ExpandResult>>> {
        self.in_flight
            .lock()
            .expect("in-flight registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::error::{AppError, AppResult};
    use crate::models::{GeneratedBatch, RecommendationItem};
    use crate::services::providers::Generator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    /// Generator that serves a fixed number of uniquely-numbered items per
    /// call, with optional latency and failure
    struct ScriptedGenerator {
        calls: AtomicUsize,
        /// Items returned per call, in order; the last entry repeats
        per_call: Vec<usize>,
        delay: StdDuration,
        fail: bool,
    }

    impl ScriptedGenerator {
        fn new(per_call: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                per_call,
                delay: StdDuration::from_millis(0),
                fail: false,
            }
        }

        fn with_delay(mut self, delay: StdDuration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            _history: &HistorySnapshot,
            _exclude: &HashSet<String>,
            _count: usize,
            _scope: &CatalogScope,
        ) -> AppResult<GeneratedBatch> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            if self.fail {
                return Err(AppError::Generation("scripted failure".to_string()));
            }

            let produced = *self
                .per_call
                .get(call)
                .or(self.per_call.last())
                .unwrap_or(&0);
            let items = (0..produced)
                .map(|i| RecommendationItem {
                    content_id: format!("rec-{}-{}", call, i),
                    title: format!("Recommendation {}-{}", call, i),
                    justification: "scripted".to_string(),
                })
                .collect();

            Ok(GeneratedBatch {
                items,
                summary: None,
            })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn coordinator(generator: Arc<ScriptedGenerator>) -> Arc<GenerationCoordinator> {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(GeneratorPool::new(vec![generator as Arc<dyn Generator>]));
        Arc::new(GenerationCoordinator::new(store, pool, Duration::hours(24)))
    }

    fn key() -> GenerationKey {
        GenerationKey::new("alice", CatalogScope::Category("for-you".to_string()))
    }

    fn history() -> Arc<HistorySnapshot> {
        Arc::new(HistorySnapshot {
            user_id: "alice".to_string(),
            items: vec![],
            fetched_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_concurrent_expands_coalesce_into_one_call() {
        // 10 of 15 requested: under the chain threshold, so exactly one
        // backend call can be attributed to this round.
        let generator = Arc::new(
            ScriptedGenerator::new(vec![10]).with_delay(StdDuration::from_millis(50)),
        );
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            let history = Arc::clone(&history);
            tasks.push(tokio::spawn(async move {
                coordinator.expand(&key, &history).await
            }));
        }

        let mut lists = Vec::new();
        for task in tasks {
            lists.push(task.await.unwrap().unwrap());
        }

        assert_eq!(generator.call_count(), 1);
        // Every caller shares the same result object.
        for list in &lists[1..] {
            assert!(Arc::ptr_eq(&lists[0], list));
        }
        assert_eq!(lists[0].items.len(), 10);
    }

    #[tokio::test]
    async fn test_lists_grow_monotonically_without_duplicates() {
        let generator = Arc::new(ScriptedGenerator::new(vec![10, 10, 10]));
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        let mut previous_len = 0;
        for _ in 0..3 {
            let list = coordinator.expand(&key, &history).await.unwrap();
            assert!(list.items.len() >= previous_len);
            previous_len = list.items.len();

            let mut seen = HashSet::new();
            for item in &list.items {
                assert!(seen.insert(item.content_id.clone()), "duplicate content id");
            }
        }
        assert_eq!(previous_len, 30);
    }

    #[tokio::test]
    async fn test_batches_append_in_dispatch_order() {
        let generator = Arc::new(ScriptedGenerator::new(vec![5, 5]));
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        coordinator.expand(&key, &history).await.unwrap();
        let list = coordinator.expand(&key, &history).await.unwrap();

        let ids: Vec<&str> = list.items.iter().map(|i| i.content_id.as_str()).collect();
        assert_eq!(&ids[..5], &["rec-0-0", "rec-0-1", "rec-0-2", "rec-0-3", "rec-0-4"]);
        assert_eq!(&ids[5..], &["rec-1-0", "rec-1-1", "rec-1-2", "rec-1-3", "rec-1-4"]);
    }

    #[tokio::test]
    async fn test_failure_resolves_every_waiter() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![0])
                .with_delay(StdDuration::from_millis(50))
                .failing(),
        );
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            let history = Arc::clone(&history);
            tasks.push(tokio::spawn(async move {
                coordinator.expand(&key, &history).await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }
        assert_eq!(generator.call_count(), 1);
        // The handle is removed on failure too.
        assert!(!coordinator.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_full_first_batch_chains_a_follow_up() {
        let generator = Arc::new(ScriptedGenerator::new(vec![15, 0]));
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        let list = coordinator.expand(&key, &history).await.unwrap();
        assert_eq!(list.items.len(), 15);

        // The follow-up runs detached; give it a moment.
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_short_first_batch_does_not_chain() {
        // 11 of 15 is under the 80% fill threshold.
        let generator = Arc::new(ScriptedGenerator::new(vec![11]));
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        coordinator.expand(&key, &history).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_background_trigger_noops_while_in_flight() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![10]).with_delay(StdDuration::from_millis(100)),
        );
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        let expand = {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            let history = Arc::clone(&history);
            tokio::spawn(async move { coordinator.expand(&key, &history).await })
        };

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(coordinator.is_in_flight(&key));
        coordinator.spawn_expansion(key.clone(), Arc::clone(&history), "test trigger");

        expand.await.unwrap().unwrap();
        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_wedge_the_key() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![10, 10]).with_delay(StdDuration::from_millis(100)),
        );
        let coordinator = coordinator(Arc::clone(&generator));
        let (key, history) = (key(), history());

        // A caller that leads a round and then disconnects mid-generation.
        let abandoned = {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            let history = Arc::clone(&history);
            tokio::spawn(async move { coordinator.expand(&key, &history).await })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(coordinator.is_in_flight(&key));
        abandoned.abort();
        assert!(abandoned.await.unwrap_err().is_cancelled());

        // The round finishes on its own and releases the registry entry.
        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert_eq!(generator.call_count(), 1);
        assert!(!coordinator.is_in_flight(&key));

        // The key is not stuck: a later caller leads a fresh round that
        // appends to the persisted first batch.
        let list = tokio::time::timeout(
            StdDuration::from_millis(500),
            coordinator.expand(&key, &history),
        )
        .await
        .expect("expansion should not block on the abandoned caller")
        .unwrap();
        assert_eq!(list.items.len(), 20);
    }

    #[tokio::test]
    async fn test_empty_pool_reports_configuration_problem() {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(GeneratorPool::empty());
        let coordinator = Arc::new(GenerationCoordinator::new(store, pool, Duration::hours(24)));

        let result = coordinator.expand(&key(), &history()).await;
        assert!(matches!(result, Err(ExpandError::NoBackend)));
    }

    #[tokio::test]
    async fn test_similar_scope_excludes_the_seed_itself() {
        struct SeedEcho {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl Generator for SeedEcho {
            async fn generate(
                &self,
                _history: &HistorySnapshot,
                exclude: &HashSet<String>,
                _count: usize,
                _scope: &CatalogScope,
            ) -> AppResult<GeneratedBatch> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                assert!(exclude.contains("tt-seed"));
                // Echo the seed back anyway; the coordinator must drop it.
                Ok(GeneratedBatch {
                    items: vec![
                        RecommendationItem {
                            content_id: "tt-seed".to_string(),
                            title: "The Seed".to_string(),
                            justification: String::new(),
                        },
                        RecommendationItem {
                            content_id: "tt-other".to_string(),
                            title: "Something Else".to_string(),
                            justification: String::new(),
                        },
                    ],
                    summary: None,
                })
            }

            fn name(&self) -> &'static str {
                "seed-echo"
            }
        }

        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(GeneratorPool::new(vec![Arc::new(SeedEcho {
            calls: AtomicUsize::new(0),
        }) as Arc<dyn Generator>]));
        let coordinator = Arc::new(GenerationCoordinator::new(store, pool, Duration::hours(24)));

        let key = GenerationKey::new("alice", CatalogScope::SimilarTo("tt-seed".to_string()));
        let list = coordinator.expand(&key, &history()).await.unwrap();

        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].content_id, "tt-other");
    }
}
