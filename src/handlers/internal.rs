//! Operator surface, guarded by the internal secret. These run the same
//! sweeps the scheduler enqueues, but synchronously, for runbooks and
//! incident response.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiResponse, Result};
use crate::services::{QuotaLedger, ScanService, ShareService, TrashService, UploadService};
use crate::AppState;

#[derive(Serialize)]
pub struct SweepResult {
    pub affected: u64,
}

#[derive(Deserialize)]
pub struct ReconcileQuery {
    pub account_id: Option<String>,
}

/// Recompute used_bytes from the file table, for one account or all
/// POST /internal/reconcile[?account_id=...]
pub async fn reconcile_quota(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ApiResponse<SweepResult>>> {
    let affected = match query.account_id.as_deref() {
        Some(account_id) => {
            QuotaLedger::reconcile(&state.db, account_id).await?;
            1
        }
        None => QuotaLedger::reconcile_all(&state.db).await?,
    };
    Ok(Json(ApiResponse::success(SweepResult { affected })))
}

/// Hard-delete trash entries past retention
/// POST /internal/purge-trash
pub async fn purge_trash(State(state): State<AppState>) -> Result<Json<ApiResponse<SweepResult>>> {
    let (files, folders) = TrashService::purge_expired(
        &state.db,
        state.store.as_ref(),
        state.config.trash.retention_days,
    )
    .await?;
    Ok(Json(ApiResponse::success(SweepResult {
        affected: files + folders,
    })))
}

/// Delete expired share links
/// POST /internal/purge-shares
pub async fn purge_shares(State(state): State<AppState>) -> Result<Json<ApiResponse<SweepResult>>> {
    let affected = ShareService::purge_expired(&state.db).await?;
    Ok(Json(ApiResponse::success(SweepResult { affected })))
}

/// Abort upload sessions older than the session TTL
/// POST /internal/reap-uploads
pub async fn reap_uploads(State(state): State<AppState>) -> Result<Json<ApiResponse<SweepResult>>> {
    let affected = UploadService::reap_stale(
        &state.db,
        state.store.as_ref(),
        state.config.upload.session_ttl_hours,
    )
    .await?;
    Ok(Json(ApiResponse::success(SweepResult { affected })))
}

/// Enqueue scans for pending files that lost their job
/// POST /internal/scan-sweep
pub async fn scan_sweep(State(state): State<AppState>) -> Result<Json<ApiResponse<SweepResult>>> {
    let affected =
        ScanService::sweep_pending(&state.db, &state.queue, state.config.scan.max_attempts).await?;
    Ok(Json(ApiResponse::success(SweepResult { affected })))
}

#[derive(Deserialize)]
pub struct DownloadUrlQuery {
    pub key: String,
}

#[derive(Serialize)]
pub struct PresignedUrl {
    pub url: String,
}

/// Presign a read URL for a raw object key, for support tooling
/// GET /internal/download-url?key=...
pub async fn download_url(
    State(state): State<AppState>,
    Query(query): Query<DownloadUrlQuery>,
) -> Result<Json<ApiResponse<PresignedUrl>>> {
    let url = state
        .store
        .presign_download_url(
            &query.key,
            Duration::from_secs(state.config.s3.presign_ttl_secs),
        )
        .await?;
    Ok(Json(ApiResponse::success(PresignedUrl { url })))
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub database: bool,
    pub scanner: bool,
}

/// Dependency health for probes and dashboards
/// GET /internal/health
pub async fn health(State(state): State<AppState>) -> Result<Json<ApiResponse<HealthStatus>>> {
    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .is_ok();
    let scanner = state.scanner.ping().await;
    Ok(Json(ApiResponse::success(HealthStatus { database, scanner })))
}
