use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::{
    error::AppResult,
    models::{GenerationKey, HistorySnapshot, RecommendationList},
};

use super::store::Store;

/// In-memory implementation of `Store`
///
/// Backs tests and local development runs where no database is available.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    histories: HashMap<String, HistorySnapshot>,
    recommendations: HashMap<GenerationKey, RecommendationList>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn load_history(&self, user_id: &str) -> AppResult<Option<HistorySnapshot>> {
        Ok(self.inner.read().await.histories.get(user_id).cloned())
    }

    async fn save_history(&self, snapshot: &HistorySnapshot) -> AppResult<()> {
        self.inner
            .write()
            .await
            .histories
            .insert(snapshot.user_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_recommendations(
        &self,
        key: &GenerationKey,
    ) -> AppResult<Option<RecommendationList>> {
        Ok(self.inner.read().await.recommendations.get(key).cloned())
    }

    async fn save_recommendations(&self, list: &RecommendationList) -> AppResult<()> {
        self.inner
            .write()
            .await
            .recommendations
            .insert(list.key.clone(), list.clone());
        Ok(())
    }

    async fn clear_user(&self, user_id: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.histories.remove(user_id);
        inner
            .recommendations
            .retain(|key, _| key.user_id != user_id);
        Ok(())
    }
}
