//! Pure freshness decisions: TTL checks and content-addressed invalidation
//! of recommendation lists via a history fingerprint.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::models::{HistorySnapshot, RecommendationList};

/// Deterministic digest over the ordered (content id, watch timestamp) pairs
/// of a history snapshot
///
/// Any change to the watched set changes the digest, which lazily invalidates
/// every recommendation list derived from the previous snapshot on next read.
pub fn history_fingerprint(snapshot: &HistorySnapshot) -> String {
    let mut hasher = Sha256::new();
    for item in &snapshot.items {
        hasher.update(item.content_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(item.watched_at.timestamp_millis().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// True iff the snapshot is younger than the history TTL
pub fn is_history_fresh(snapshot: &HistorySnapshot, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - snapshot.fetched_at < ttl
}

/// True iff the list is younger than the recommendation TTL and was derived
/// from the current history snapshot
pub fn is_list_usable(
    list: &RecommendationList,
    current_fingerprint: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> bool {
    now - list.updated_at < ttl && list.source_fingerprint == current_fingerprint
}
