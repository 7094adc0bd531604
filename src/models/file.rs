use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Malware-scan status of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Clean,
    Infected,
}

/// File model
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct File {
    pub id: String,
    pub account_id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub object_key: String,
    pub etag: Option<String>,
    pub version: i64,
    pub scan_status: ScanStatus,
    pub virus_name: Option<String>,
    pub trashed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Rename / move request
#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub name: Option<String>,
    pub folder_id: Option<String>,
    /// Set to move the file to the root instead of a folder.
    #[serde(default)]
    pub move_to_root: bool,
}

/// File listing query
#[derive(Debug, Deserialize)]
pub struct FileQuery {
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

/// Paged file listing
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub items: Vec<File>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Presigned download link
#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    pub download_url: String,
    pub file_name: String,
    pub content_type: Option<String>,
}
