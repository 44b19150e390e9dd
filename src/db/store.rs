use crate::{
    error::AppResult,
    models::{GenerationKey, HistorySnapshot, RecommendationList},
};

/// Durable persistence for the two record kinds this service owns: one
/// history snapshot per user and one recommendation list per (user, scope)
///
/// Writes are single-row upserts; callers never need multi-key transactions.
/// Components read and write records only through this trait — nothing
/// mutates a stored list in place.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Loads the user's history snapshot, if one was ever saved
    async fn load_history(&self, user_id: &str) -> AppResult<Option<HistorySnapshot>>;

    /// Replaces the user's history snapshot wholesale
    async fn save_history(&self, snapshot: &HistorySnapshot) -> AppResult<()>;

    /// Loads the recommendation list for a key, if one exists
    async fn load_recommendations(&self, key: &GenerationKey)
        -> AppResult<Option<RecommendationList>>;

    /// Upserts the full merged recommendation list for its key
    async fn save_recommendations(&self, list: &RecommendationList) -> AppResult<()>;

    /// Explicit invalidation: removes the user's history snapshot and every
    /// recommendation list derived from it
    async fn clear_user(&self, user_id: &str) -> AppResult<()>;
}
