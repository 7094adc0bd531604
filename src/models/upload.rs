use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Durable multipart upload session. Lives from initiate to
/// complete/abort; a different server instance may finish it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UploadSession {
    pub id: String,
    pub account_id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub object_key: String,
    pub part_count: i64,
    pub created_at: String,
}

/// Initiate upload request
#[derive(Debug, Deserialize)]
pub struct InitiateUploadRequest {
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub folder_id: Option<String>,
}

/// One presigned part slot the client uploads to directly.
#[derive(Debug, Serialize)]
pub struct UploadPart {
    pub part_number: i64,
    /// Byte range [start, end] inclusive within the file.
    pub start: i64,
    pub end: i64,
    pub presigned_url: String,
}

/// Initiate upload response
#[derive(Debug, Serialize)]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    pub object_key: String,
    pub parts: Vec<UploadPart>,
}

/// Client-reported etag for one uploaded part
#[derive(Debug, Clone, Deserialize)]
pub struct PartEtag {
    pub part_number: i64,
    pub etag: String,
}

/// Complete upload request
#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub parts: Vec<PartEtag>,
}

/// Abort upload request
#[derive(Debug, Deserialize)]
pub struct AbortUploadRequest {
    pub upload_id: String,
}
