use serde::Serialize;
use sqlx::FromRow;

/// Append-only audit record
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub account_id: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub detail: Option<String>,
    pub created_at: String,
}
