use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::{
    error::{AppError, AppResult},
    models::{CatalogScope, GenerationKey, HistorySnapshot, RecommendationList},
};

use super::store::Store;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Creates the two tables this service persists, if absent
pub async fn init_schema(pool: &PgPool) -> AppResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history_snapshots (
            user_id    TEXT PRIMARY KEY,
            items      JSONB NOT NULL,
            fetched_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recommendation_lists (
            user_id     TEXT NOT NULL,
            scope       TEXT NOT NULL,
            items       JSONB NOT NULL,
            fingerprint TEXT NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, scope)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// PostgreSQL-backed implementation of `Store`
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn scope_column(scope: &CatalogScope) -> String {
    scope.to_string()
}

fn parse_scope(raw: &str) -> CatalogScope {
    if let Some(seed) = raw.strip_prefix("similar:") {
        CatalogScope::SimilarTo(seed.to_string())
    } else {
        CatalogScope::Category(raw.strip_prefix("category:").unwrap_or(raw).to_string())
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn load_history(&self, user_id: &str) -> AppResult<Option<HistorySnapshot>> {
        let row = sqlx::query(
            "SELECT items, fetched_at FROM history_snapshots WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: serde_json::Value = row.try_get("items")?;
        let fetched_at: DateTime<Utc> = row.try_get("fetched_at")?;
        let items = serde_json::from_value(items)
            .map_err(|e| AppError::Internal(format!("Corrupt history row: {}", e)))?;

        Ok(Some(HistorySnapshot {
            user_id: user_id.to_string(),
            items,
            fetched_at,
        }))
    }

    async fn save_history(&self, snapshot: &HistorySnapshot) -> AppResult<()> {
        let items = serde_json::to_value(&snapshot.items)
            .map_err(|e| AppError::Internal(format!("History serialization error: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO history_snapshots (user_id, items, fetched_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET items = EXCLUDED.items, fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(&snapshot.user_id)
        .bind(items)
        .bind(snapshot.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_recommendations(
        &self,
        key: &GenerationKey,
    ) -> AppResult<Option<RecommendationList>> {
        let row = sqlx::query(
            r#"
            SELECT scope, items, fingerprint, updated_at
            FROM recommendation_lists
            WHERE user_id = $1 AND scope = $2
            "#,
        )
        .bind(&key.user_id)
        .bind(scope_column(&key.scope))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let scope: String = row.try_get("scope")?;
        let items: serde_json::Value = row.try_get("items")?;
        let fingerprint: String = row.try_get("fingerprint")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        let items = serde_json::from_value(items)
            .map_err(|e| AppError::Internal(format!("Corrupt recommendation row: {}", e)))?;

        Ok(Some(RecommendationList {
            key: GenerationKey::new(key.user_id.clone(), parse_scope(&scope)),
            items,
            source_fingerprint: fingerprint,
            updated_at,
        }))
    }

    async fn save_recommendations(&self, list: &RecommendationList) -> AppResult<()> {
        let items = serde_json::to_value(&list.items).map_err(|e| {
            AppError::Internal(format!("Recommendation serialization error: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO recommendation_lists (user_id, scope, items, fingerprint, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, scope)
            DO UPDATE SET items = EXCLUDED.items,
                          fingerprint = EXCLUDED.fingerprint,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&list.key.user_id)
        .bind(scope_column(&list.key.scope))
        .bind(items)
        .bind(&list.source_fingerprint)
        .bind(list.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_user(&self, user_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM history_snapshots WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM recommendation_lists WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(user_id = %user_id, "Cleared persisted records for user");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_column_round_trip() {
        let category = CatalogScope::Category("for-you".to_string());
        assert_eq!(parse_scope(&scope_column(&category)), category);

        let similar = CatalogScope::SimilarTo("tt1375666".to_string());
        assert_eq!(parse_scope(&scope_column(&similar)), similar);
    }

    #[test]
    fn test_parse_scope_tolerates_bare_names() {
        // Rows written before the prefix convention parse as categories.
        assert_eq!(
            parse_scope("for-you"),
            CatalogScope::Category("for-you".to_string())
        );
    }
}
