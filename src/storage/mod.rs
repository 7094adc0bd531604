pub mod s3;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub use s3::S3Store;

/// One completed part in a multipart upload
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: i64,
    pub etag: String,
}

/// Object store capability: opaque byte blobs addressed by key, with
/// presigned-URL access so clients transfer bytes directly.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a multipart upload session, returning the upload id.
    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String>;

    /// Presign an upload URL for one part.
    async fn presign_part_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i64,
        ttl: Duration,
    ) -> Result<String>;

    /// Finish a multipart upload, returning the object etag.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    /// Abort a multipart upload. Tolerates already-aborted sessions.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Presign a plain PUT (used for zero-byte files).
    async fn presign_put_url(&self, key: &str, content_type: &str, ttl: Duration)
        -> Result<String>;

    /// Presign a GET for downloads and scan streaming.
    async fn presign_download_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Delete an object. Missing keys are not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;
}
