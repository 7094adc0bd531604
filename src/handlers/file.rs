use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use crate::error::{ApiResponse, Result};
use crate::models::{
    CurrentAccount, DownloadUrlResponse, File, FileListResponse, FileQuery, UpdateFileRequest,
};
use crate::services::{FileService, TrashService};
use crate::AppState;

/// List files in a folder (or the root)
/// GET /api/v1/files?folder_id=xxx&page=1&limit=50
pub async fn list_files(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ApiResponse<FileListResponse>>> {
    let files = FileService::list(
        &state.db,
        &account.id,
        query.folder_id.as_deref(),
        query.page,
        query.limit,
    )
    .await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<File>>> {
    let file = FileService::get(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Rename or move a file
/// PATCH /api/v1/files/:id
pub async fn update_file(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFileRequest>,
) -> Result<Json<ApiResponse<File>>> {
    let file = FileService::update(&state.db, &account.id, &id, req).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Presigned download link
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DownloadUrlResponse>>> {
    let resp = FileService::download_url(
        &state.db,
        state.store.as_ref(),
        &account.id,
        &id,
        state.config.s3.presign_ttl_secs,
    )
    .await?;
    Ok(Json(ApiResponse::success(resp)))
}

/// Move a file to the trash
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    TrashService::trash_file(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File moved to trash")))
}
