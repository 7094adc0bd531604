use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{
    AbortUploadRequest, CompleteUploadRequest, CurrentAccount, File, InitiateUploadRequest,
    InitiateUploadResponse,
};
use crate::services::UploadService;
use crate::AppState;

/// Start a chunked upload: reserves quota, returns presigned part URLs
/// POST /api/v1/uploads
pub async fn initiate(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Json(req): Json<InitiateUploadRequest>,
) -> Result<Json<ApiResponse<InitiateUploadResponse>>> {
    let resp = UploadService::initiate(
        &state.db,
        state.store.as_ref(),
        &account.id,
        req,
        state.config.upload.max_file_size,
    )
    .await?;
    Ok(Json(ApiResponse::success(resp)))
}

/// Finish an upload: the file row appears with a pending scan verdict
/// POST /api/v1/uploads/complete
pub async fn complete(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<ApiResponse<File>>> {
    let file = UploadService::complete(
        &state.db,
        state.store.as_ref(),
        &account.id,
        req,
        state.config.scan.max_attempts,
    )
    .await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Abandon an upload and return its reserved bytes
/// POST /api/v1/uploads/abort
pub async fn abort(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Json(req): Json<AbortUploadRequest>,
) -> Result<Json<ApiResponse<()>>> {
    UploadService::abort(&state.db, state.store.as_ref(), &account.id, &req.upload_id).await?;
    Ok(Json(ApiResponse::<()>::success_message("Upload aborted")))
}
