use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{error::AppResult, models::CatalogEntry};

use super::AppState;

/// Pagination query for catalog pages
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: usize,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub items: Vec<CatalogEntry>,
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Serves one catalog page for (user, content type, category)
pub async fn get_catalog(
    State(state): State<AppState>,
    Path((user_id, content_type, category_id)): Path<(String, String, String)>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<CatalogResponse>> {
    let items = state
        .catalog
        .get_page(&user_id, &content_type, &category_id, page.skip)
        .await?;

    Ok(Json(CatalogResponse { items }))
}

/// Explicitly invalidates a user's cached history and recommendations
pub async fn invalidate_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<StatusCode> {
    state.store.clear_user(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
