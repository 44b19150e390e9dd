//! Watch-history provider boundary.

use reqwest::Client as HttpClient;

use crate::{
    error::{AppError, AppResult},
    models::HistoryItem,
};

/// Trait for watch-history sources
///
/// Callers must tolerate provider errors by serving a stale snapshot rather
/// than failing the page; see `CatalogService::resolve_history`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetches the user's full watch history, most recent last
    async fn fetch_history(&self, user_id: &str) -> AppResult<Vec<HistoryItem>>;
}

/// HTTP watch-history provider
pub struct HistoryApiProvider {
    http_client: HttpClient,
    api_url: String,
    api_key: Option<String>,
}

impl HistoryApiProvider {
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_url,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl HistoryProvider for HistoryApiProvider {
    async fn fetch_history(&self, user_id: &str) -> AppResult<Vec<HistoryItem>> {
        let url = format!("{}/users/{}/history", self.api_url, user_id);

        let mut request = self.http_client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "History API returned status {}: {}",
                status, body
            )));
        }

        let items: Vec<HistoryItem> = response.json().await?;

        tracing::debug!(
            user_id = %user_id,
            item_count = items.len(),
            "Fetched watch history"
        );

        Ok(items)
    }
}
