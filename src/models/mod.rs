use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Kind of content a history item or catalog entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Series,
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Movie => write!(f, "movie"),
            ContentKind::Series => write!(f, "series"),
        }
    }
}

/// One watched title from the user's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Stable content identifier (e.g., an IMDB ID)
    pub content_id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    pub kind: ContentKind,
    #[serde(default)]
    pub tags: Vec<String>,
    /// User rating on the provider's scale, if the user rated the title
    #[serde(default)]
    pub rating: Option<f32>,
    pub watched_at: DateTime<Utc>,
}

/// The most recently fetched watch history for a user
///
/// At most one snapshot exists per user. A refresh replaces the snapshot
/// wholesale; snapshots are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub user_id: String,
    pub items: Vec<HistoryItem>,
    pub fetched_at: DateTime<Utc>,
}

impl HistorySnapshot {
    /// An empty snapshot, used when no history could be obtained
    pub fn empty(user_id: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            items: Vec::new(),
            fetched_at,
        }
    }
}

/// A single generated recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub content_id: String,
    pub title: String,
    /// Human-readable explanation of why this title was recommended
    pub justification: String,
}

/// Which catalog a recommendation list belongs to
///
/// `SimilarTo` catalogs coordinate on the seed content id, so requests for
/// "similar to X" never coalesce with the user's general category catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogScope {
    /// A named category such as "for-you" or "sci-fi"
    Category(String),
    /// Titles similar to one seed content id
    SimilarTo(String),
}

impl CatalogScope {
    /// Parses a client-facing category id into a scope
    ///
    /// Category ids of the form `similar-<contentId>` select the similar-to
    /// scope; everything else is a plain category name.
    pub fn parse(category_id: &str) -> Self {
        match category_id.strip_prefix("similar-") {
            Some(seed) if !seed.is_empty() => CatalogScope::SimilarTo(seed.to_string()),
            _ => CatalogScope::Category(category_id.to_string()),
        }
    }
}

impl Display for CatalogScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogScope::Category(name) => write!(f, "category:{}", name),
            CatalogScope::SimilarTo(seed) => write!(f, "similar:{}", seed),
        }
    }
}

/// The single-flight coordination unit: at most one in-flight generation
/// call may exist per key at any instant, process-wide
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationKey {
    pub user_id: String,
    pub scope: CatalogScope,
}

impl GenerationKey {
    pub fn new(user_id: impl Into<String>, scope: CatalogScope) -> Self {
        Self {
            user_id: user_id.into(),
            scope,
        }
    }
}

impl Display for GenerationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.scope)
    }
}

/// The accumulated, ordered recommendations for one (user, scope) pair
///
/// Content ids are unique within a list and growth is append-only: new
/// batches extend the tail, existing items are never reordered or truncated
/// short of full invalidation. The list is usable only while
/// `source_fingerprint` matches the current history snapshot's fingerprint
/// and `updated_at` is within the recommendation TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationList {
    pub key: GenerationKey,
    pub items: Vec<RecommendationItem>,
    /// Digest of the history snapshot these recommendations were derived from
    pub source_fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

/// One batch returned by a generation backend
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedBatch {
    pub items: Vec<RecommendationItem>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Stable id used by placeholder entries so clients can recognize them
pub const NOTICE_ENTRY_ID: &str = "curator-notice";

/// Catalog entry as served to the polling client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
}

impl CatalogEntry {
    pub fn from_recommendation(item: &RecommendationItem, content_type: &str) -> Self {
        Self {
            id: item.content_id.clone(),
            kind: content_type.to_string(),
            name: item.title.clone(),
            description: item.justification.clone(),
        }
    }

    /// A synthetic entry communicating an error or empty state in the data
    /// shape the client expects, instead of an out-of-band error
    pub fn notice(content_type: &str, name: &str, description: &str) -> Self {
        Self {
            id: NOTICE_ENTRY_ID.to_string(),
            kind: content_type.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_plain_category() {
        assert_eq!(
            CatalogScope::parse("for-you"),
            CatalogScope::Category("for-you".to_string())
        );
    }

    #[test]
    fn test_scope_parse_similar_to() {
        assert_eq!(
            CatalogScope::parse("similar-tt1375666"),
            CatalogScope::SimilarTo("tt1375666".to_string())
        );
    }

    #[test]
    fn test_scope_parse_bare_similar_prefix_is_a_category() {
        assert_eq!(
            CatalogScope::parse("similar-"),
            CatalogScope::Category("similar-".to_string())
        );
    }

    #[test]
    fn test_generation_key_display() {
        let key = GenerationKey::new("alice", CatalogScope::Category("sci-fi".to_string()));
        assert_eq!(format!("{}", key), "alice/category:sci-fi");

        let key = GenerationKey::new("alice", CatalogScope::SimilarTo("tt0133093".to_string()));
        assert_eq!(format!("{}", key), "alice/similar:tt0133093");
    }

    #[test]
    fn test_notice_entry_uses_stable_id() {
        let entry = CatalogEntry::notice("movie", "Setup required", "Connect your history");
        assert_eq!(entry.id, NOTICE_ENTRY_ID);
        assert_eq!(entry.kind, "movie");
    }
}
