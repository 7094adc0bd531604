use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::error::{ApiResponse, Result};
use crate::models::{
    Breadcrumb, CreateFolderRequest, CurrentAccount, Folder, FolderChildren, UpdateFolderRequest,
};
use crate::services::FolderService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChildrenQuery {
    pub folder_id: Option<String>,
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

/// Create a folder
/// POST /api/v1/folders
pub async fn create_folder(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<ApiResponse<Folder>>> {
    let folder = FolderService::create(&state.db, &account.id, req).await?;
    Ok(Json(ApiResponse::success(folder)))
}

/// List the children of a folder, or of the root when folder_id is absent
/// GET /api/v1/folders?folder_id=xxx&page=1&limit=50
pub async fn list_children(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Query(query): Query<ChildrenQuery>,
) -> Result<Json<ApiResponse<FolderChildren>>> {
    let children = FolderService::list_children(
        &state.db,
        &account.id,
        query.folder_id.as_deref(),
        query.page,
        query.limit,
    )
    .await?;
    Ok(Json(ApiResponse::success(children)))
}

/// Ancestor chain, root first
/// GET /api/v1/folders/:id/breadcrumbs
pub async fn breadcrumbs(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Breadcrumb>>>> {
    let crumbs = FolderService::breadcrumbs(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::success(crumbs)))
}

/// Rename or move a folder
/// PATCH /api/v1/folders/:id
pub async fn update_folder(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFolderRequest>,
) -> Result<Json<ApiResponse<Folder>>> {
    let folder = FolderService::update(&state.db, &account.id, &id, req).await?;
    Ok(Json(ApiResponse::success(folder)))
}

/// Soft-delete a folder subtree
/// DELETE /api/v1/folders/:id
pub async fn delete_folder(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    let removed = FolderService::remove(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message(&format!(
        "{} folders moved to trash",
        removed
    ))))
}
