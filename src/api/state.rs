use std::sync::Arc;

use chrono::Duration;

use crate::{
    db::Store,
    services::{
        history::HistoryProvider, providers::GeneratorPool, CatalogService, GenerationCoordinator,
        PrefetchScheduler,
    },
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogService>,
    pub store: Arc<dyn Store>,
}

impl AppState {
    /// Wires the catalog stack: coordinator and prefetch scheduler over the
    /// given store, history provider, and generation backend pool
    pub fn new(
        store: Arc<dyn Store>,
        history_provider: Arc<dyn HistoryProvider>,
        generators: Arc<GeneratorPool>,
        history_ttl: Duration,
        recommendation_ttl: Duration,
    ) -> Self {
        let coordinator = Arc::new(GenerationCoordinator::new(
            Arc::clone(&store),
            generators,
            recommendation_ttl,
        ));
        let prefetch = PrefetchScheduler::new(Arc::clone(&coordinator));
        let catalog = Arc::new(CatalogService::new(
            Arc::clone(&store),
            history_provider,
            coordinator,
            prefetch,
            history_ttl,
            recommendation_ttl,
        ));

        Self { catalog, store }
    }
}
