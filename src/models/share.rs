use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Share model — a capability token over exactly one file or folder
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Share {
    pub id: String,
    pub account_id: String,
    pub file_id: Option<String>,
    pub folder_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub expires_at: Option<String>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub created_at: String,
}

/// Request to create a share
#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub file_id: Option<String>,
    pub folder_id: Option<String>,
    pub password: Option<String>,
    pub expires_at: Option<String>,
    pub max_downloads: Option<i64>,
}

/// Request to verify share password
#[derive(Debug, Deserialize)]
pub struct VerifySharePasswordRequest {
    pub password: String,
}

/// Public share info — safe to return to anyone holding the link.
/// Never reveals the password hash, only whether one is required.
#[derive(Debug, Serialize)]
pub struct PublicShareInfo {
    pub id: String,
    pub file_id: Option<String>,
    pub folder_id: Option<String>,
    pub target_name: String,
    pub target_size: Option<i64>,
    pub mime_type: Option<String>,
    pub requires_password: bool,
    pub expires_at: Option<String>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
}
