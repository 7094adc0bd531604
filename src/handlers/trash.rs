use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::error::{ApiResponse, Result};
use crate::models::{CurrentAccount, File, TrashListResponse};
use crate::services::TrashService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TrashQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    50
}

/// List trashed files and folders
/// GET /api/v1/trash
pub async fn list_trash(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Query(query): Query<TrashQuery>,
) -> Result<Json<ApiResponse<TrashListResponse>>> {
    let listing = TrashService::list(&state.db, &account.id, query.page, query.limit).await?;
    Ok(Json(ApiResponse::success(listing)))
}

/// Restore a trashed file (re-reserves its quota)
/// POST /api/v1/trash/files/:id/restore
pub async fn restore_file(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<File>>> {
    let file = TrashService::restore_file(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Restore a trashed folder subtree
/// POST /api/v1/trash/folders/:id/restore
pub async fn restore_folder(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    let restored = TrashService::restore_folder(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message(&format!(
        "{} folders restored",
        restored
    ))))
}

/// Permanently delete everything in the trash
/// DELETE /api/v1/trash
pub async fn empty_trash(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
) -> Result<Json<ApiResponse<()>>> {
    let (files, folders) = TrashService::empty(&state.db, state.store.as_ref(), &account.id).await?;
    Ok(Json(ApiResponse::<()>::success_message(&format!(
        "Deleted {} files and {} folders",
        files, folders
    ))))
}
