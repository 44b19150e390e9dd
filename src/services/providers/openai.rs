/// OpenAI-compatible generation backend
///
/// Speaks the chat-completions protocol and asks the model for strict JSON.
/// Models routinely wrap JSON in markdown fences or return near-miss shapes,
/// so parsing is defensive: fences are stripped and both a bare array and a
/// wrapped object are accepted. Anything else is a `Generation` error.
use std::collections::HashSet;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{CatalogScope, GeneratedBatch, HistorySnapshot, RecommendationItem},
    services::providers::Generator,
};

/// Most recent history items included in the prompt; older items add tokens
/// without improving recommendations
const PROMPT_HISTORY_LIMIT: usize = 60;

#[derive(Clone)]
pub struct OpenAiGenerator {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Shape the model is asked to produce for each recommendation
#[derive(Debug, Deserialize)]
struct RawRecommendation {
    id: String,
    title: String,
    #[serde(default)]
    reason: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            model,
        }
    }

    /// Builds the user prompt for one generation call
    fn build_prompt(
        &self,
        history: &HistorySnapshot,
        exclude: &HashSet<String>,
        count: usize,
        scope: &CatalogScope,
    ) -> String {
        let mut watched: Vec<String> = history
            .items
            .iter()
            .rev()
            .take(PROMPT_HISTORY_LIMIT)
            .map(|item| {
                let rating = item
                    .rating
                    .map(|r| format!(", rated {:.0}/10", r))
                    .unwrap_or_default();
                format!(
                    "- {} ({}{}, {}{})",
                    item.title,
                    item.content_id,
                    item.year.map(|y| format!(", {}", y)).unwrap_or_default(),
                    item.kind,
                    rating
                )
            })
            .collect();
        watched.reverse();

        let focus = match scope {
            CatalogScope::Category(name) => format!("the \"{}\" category", name),
            CatalogScope::SimilarTo(seed) => {
                format!("titles similar to the one with id {}", seed)
            }
        };

        let mut excluded: Vec<&str> = exclude.iter().map(String::as_str).collect();
        excluded.sort_unstable();

        format!(
            "Recommend exactly {count} titles for {focus}, based on this watch history:\n\
             {history}\n\n\
             Never recommend these ids: {excluded}.\n\
             Respond with JSON only, in this shape:\n\
             {{\"recommendations\":[{{\"id\":\"<imdb id>\",\"title\":\"<name>\",\"reason\":\"<one sentence>\"}}]}}",
            count = count,
            focus = focus,
            history = watched.join("\n"),
            excluded = excluded.join(", "),
        )
    }

    /// Parses the model's reply into a batch
    fn parse_batch(content: &str) -> AppResult<GeneratedBatch> {
        let trimmed = Self::strip_code_fences(content);

        // Accept either {"recommendations": [...]} or a bare array.
        #[derive(Deserialize)]
        struct Wrapped {
            recommendations: Vec<RawRecommendation>,
            #[serde(default)]
            summary: Option<String>,
        }

        let (raw, summary) = if let Ok(wrapped) = serde_json::from_str::<Wrapped>(trimmed) {
            (wrapped.recommendations, wrapped.summary)
        } else {
            let raw: Vec<RawRecommendation> = serde_json::from_str(trimmed).map_err(|e| {
                AppError::Generation(format!("Unparseable backend response: {}", e))
            })?;
            (raw, None)
        };

        let items: Vec<RecommendationItem> = raw
            .into_iter()
            .filter(|r| !r.id.trim().is_empty() && !r.title.trim().is_empty())
            .map(|r| RecommendationItem {
                content_id: r.id,
                title: r.title,
                justification: r.reason.unwrap_or_default(),
            })
            .collect();

        Ok(GeneratedBatch { items, summary })
    }

    /// Strips a surrounding markdown code fence, if present
    fn strip_code_fences(content: &str) -> &str {
        let trimmed = content.trim();
        let Some(inner) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        inner.strip_suffix("```").unwrap_or(inner).trim()
    }
}

#[async_trait::async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        history: &HistorySnapshot,
        exclude: &HashSet<String>,
        count: usize,
        scope: &CatalogScope,
    ) -> AppResult<GeneratedBatch> {
        let url = format!("{}/chat/completions", self.api_url);
        let prompt = self.build_prompt(history, exclude, count, scope);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You are a film and television recommendation engine. \
                                    Respond with strict JSON and nothing else."
                    },
                    { "role": "user", "content": prompt }
                ],
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation(format!(
                "Backend returned status {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AppError::Generation("Backend response had no choices".to_string()))?;

        let batch = Self::parse_batch(content)?;

        tracing::info!(
            requested = count,
            returned = batch.items.len(),
            model = %self.model,
            "Generation call completed"
        );

        Ok(batch)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
