/// Generation backend abstraction
///
/// This module provides a pluggable architecture for recommendation
/// generation backends. Each backend turns a watch history plus an exclusion
/// set into a batch of new recommendations; backends own their prompt
/// construction and response validation. The core treats them as opaque,
/// possibly-failing, possibly-slow functions.
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{CatalogScope, GeneratedBatch, HistorySnapshot},
};

pub mod openai;

/// Trait for generation backends
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Generates up to `count` new recommendations
    ///
    /// `exclude` lists content ids the backend must not return again. Backends
    /// are asked to honor it but may not; callers re-filter the response.
    async fn generate(
        &self,
        history: &HistorySnapshot,
        exclude: &HashSet<String>,
        count: usize,
        scope: &CatalogScope,
    ) -> AppResult<GeneratedBatch>;

    /// Backend name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Round-robin selector over the configured generation backends
///
/// The rotation cursor lives here rather than in a module-level global so it
/// can be injected and reset in tests.
pub struct GeneratorPool {
    backends: Vec<Arc<dyn Generator>>,
    cursor: AtomicUsize,
}

impl GeneratorPool {
    pub fn new(backends: Vec<Arc<dyn Generator>>) -> Self {
        Self {
            backends,
            cursor: AtomicUsize::new(0),
        }
    }

    /// A pool with no configured backends; every selection fails
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Selects the next backend in rotation, or `None` when none are
    /// configured
    pub fn next(&self) -> Option<Arc<dyn Generator>> {
        if self.backends.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.backends.len();
        Some(Arc::clone(&self.backends[index]))
    }

    /// Resets the rotation to the first backend
    pub fn reset_rotation(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecommendationItem;

    struct NamedGenerator(&'static str);

    #[async_trait::async_trait]
    impl Generator for NamedGenerator {
        async fn generate(
            &self,
            _history: &HistorySnapshot,
            _exclude: &HashSet<String>,
            _count: usize,
            _scope: &CatalogScope,
        ) -> AppResult<GeneratedBatch> {
            Ok(GeneratedBatch {
                items: vec![RecommendationItem {
                    content_id: self.0.to_string(),
                    title: self.0.to_string(),
                    justification: String::new(),
                }],
                summary: None,
            })
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    #[test]
    fn test_empty_pool_yields_nothing() {
        let pool = GeneratorPool::empty();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert!(pool.next().is_none());
    }

    #[test]
    fn test_rotation_cycles_in_order() {
        let pool = GeneratorPool::new(vec![
            Arc::new(NamedGenerator("a")),
            Arc::new(NamedGenerator("b")),
            Arc::new(NamedGenerator("c")),
        ]);
        assert_eq!(pool.len(), 3);

        let picks: Vec<&str> = (0..6).map(|_| pool.next().unwrap().name()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_reset_rotation_returns_to_first() {
        let pool = GeneratorPool::new(vec![
            Arc::new(NamedGenerator("a")),
            Arc::new(NamedGenerator("b")),
        ]);

        pool.next();
        pool.reset_rotation();
        assert_eq!(pool.next().unwrap().name(), "a");
    }
}
