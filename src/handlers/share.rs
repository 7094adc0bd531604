use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    CreateShareRequest, CurrentAccount, DownloadUrlResponse, PublicShareInfo, Share,
    VerifySharePasswordRequest,
};
use crate::services::ShareService;
use crate::AppState;

/// Create a share link
/// POST /api/v1/shares
pub async fn create_share(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<ApiResponse<Share>>> {
    let share = ShareService::create(&state.db, &account.id, req).await?;
    Ok(Json(ApiResponse::success(share)))
}

/// List the current account's shares
/// GET /api/v1/shares
pub async fn list_shares(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
) -> Result<Json<ApiResponse<Vec<Share>>>> {
    let shares = ShareService::list(&state.db, &account.id).await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// Revoke a share
/// DELETE /api/v1/shares/:id
pub async fn delete_share(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    ShareService::delete(&state.db, &account.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("Share revoked")))
}

/// Public share metadata for anyone holding the link
/// GET /api/v1/public/share/:id
pub async fn get_public_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PublicShareInfo>>> {
    let info = ShareService::resolve(&state.db, &id).await?;
    Ok(Json(ApiResponse::success(info)))
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

/// Check a candidate password against a protected share
/// POST /api/v1/public/share/:id/verify
pub async fn verify_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VerifySharePasswordRequest>,
) -> Result<Json<ApiResponse<VerifyResponse>>> {
    let valid = ShareService::validate_password(&state.db, &id, &req.password).await?;
    Ok(Json(ApiResponse::success(VerifyResponse { valid })))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub password: Option<String>,
}

/// Download a shared file; a protected share requires the password on
/// every download, not just the verify call
/// GET /api/v1/public/share/:id/download?password=xxx
pub async fn download_public_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<ApiResponse<DownloadUrlResponse>>> {
    let info = ShareService::resolve(&state.db, &id).await?;
    if info.requires_password {
        let candidate = query.password.as_deref().unwrap_or_default();
        if !ShareService::validate_password(&state.db, &id, candidate).await? {
            return Err(AppError::Unauthorized("Invalid share password".to_string()));
        }
    }

    let resp = ShareService::download(
        &state.db,
        state.store.as_ref(),
        &id,
        state.config.s3.presign_ttl_secs,
    )
    .await?;
    Ok(Json(ApiResponse::success(resp)))
}
