use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{Account, AuditEntry, CurrentAccount, QuotaInfo};
use crate::services::{AuditService, QuotaLedger};
use crate::AppState;

/// Get the current account
/// GET /api/v1/account
pub async fn get_account(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
) -> Result<Json<ApiResponse<Account>>> {
    let row: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(&account.id)
        .fetch_optional(state.db.pool())
        .await?;
    let row = row.ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;
    Ok(Json(ApiResponse::success(row)))
}

/// Get quota usage for the current account
/// GET /api/v1/account/quota
pub async fn get_quota(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
) -> Result<Json<ApiResponse<QuotaInfo>>> {
    let usage = QuotaLedger::usage(&state.db, &account.id).await?;
    Ok(Json(ApiResponse::success(usage)))
}

/// Recent audit entries for the current account
/// GET /api/v1/account/audit
pub async fn get_audit_log(
    State(state): State<AppState>,
    Extension(account): Extension<CurrentAccount>,
) -> Result<Json<ApiResponse<Vec<AuditEntry>>>> {
    let entries = AuditService::recent(&state.db, &account.id, 100).await?;
    Ok(Json(ApiResponse::success(entries)))
}
