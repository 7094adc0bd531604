use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::{
    CreateShareRequest, DownloadUrlResponse, File, Folder, PublicShareInfo, Share,
};
use crate::storage::ObjectStore;

/// Share links: capability tokens over one file or folder, with optional
/// password, expiry and download ceiling.
pub struct ShareService;

impl ShareService {
    pub async fn create(
        db: &Database,
        account_id: &str,
        req: CreateShareRequest,
    ) -> Result<Share> {
        match (&req.file_id, &req.folder_id) {
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest(
                    "Share exactly one of file or folder, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(AppError::BadRequest(
                    "Either a file or a folder target is required".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(file_id) = &req.file_id {
            crate::services::FileService::get(db, account_id, file_id).await?;
        }
        if let Some(folder_id) = &req.folder_id {
            crate::services::FolderService::get(db, account_id, folder_id).await?;
        }

        if let Some(max) = req.max_downloads {
            if max <= 0 {
                return Err(AppError::BadRequest(
                    "max_downloads must be positive".to_string(),
                ));
            }
        }

        // Normalize to the fixed-width UTC form every stored timestamp
        // uses; an offset variant would break the string ordering that
        // expiry checks rely on.
        let expires_at = match req.expires_at.as_deref() {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| {
                        AppError::BadRequest(
                            "expires_at must be an RFC 3339 timestamp".to_string(),
                        )
                    })?
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            None => None,
        };

        // Passwords are stored only as argon2id hashes, same strength as
        // account credentials.
        let password_hash = match req.password.as_deref() {
            Some(password) if !password.is_empty() => {
                let salt = SaltString::generate(&mut OsRng);
                Some(
                    Argon2::default()
                        .hash_password(password.as_bytes(), &salt)
                        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
                        .to_string(),
                )
            }
            _ => None,
        };

        let share: Share = sqlx::query_as(
            r#"
            INSERT INTO shares (id, account_id, file_id, folder_id, password_hash,
                                expires_at, max_downloads, download_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(&req.file_id)
        .bind(&req.folder_id)
        .bind(&password_hash)
        .bind(&expires_at)
        .bind(req.max_downloads)
        .bind(now_rfc3339())
        .fetch_one(db.pool())
        .await?;

        let (target_type, target_id) = match (&share.file_id, &share.folder_id) {
            (Some(id), _) => ("file", id.as_str()),
            (_, Some(id)) => ("folder", id.as_str()),
            _ => ("share", share.id.as_str()),
        };
        crate::services::AuditService::log(
            db,
            account_id,
            "SHARE_CREATED",
            target_type,
            target_id,
            None,
        )
        .await?;

        Ok(share)
    }

    async fn get(db: &Database, share_id: &str) -> Result<Share> {
        let share: Option<Share> = sqlx::query_as("SELECT * FROM shares WHERE id = ?")
            .bind(share_id)
            .fetch_optional(db.pool())
            .await?;
        share.ok_or_else(|| AppError::NotFound("Share not found".to_string()))
    }

    /// Gate checks in order: existence, expiry, download ceiling.
    async fn check_access(db: &Database, share_id: &str) -> Result<Share> {
        let share = Self::get(db, share_id).await?;

        if let Some(expires_at) = &share.expires_at {
            if expires_at.as_str() < now_rfc3339().as_str() {
                return Err(AppError::Expired);
            }
        }
        if let Some(max) = share.max_downloads {
            if share.download_count >= max {
                return Err(AppError::LimitReached);
            }
        }
        Ok(share)
    }

    /// Public metadata for anyone holding the link. Reveals only whether a
    /// password is required, never the hash.
    pub async fn resolve(db: &Database, share_id: &str) -> Result<PublicShareInfo> {
        let share = Self::check_access(db, share_id).await?;

        let (target_name, target_size, mime_type) = if let Some(file_id) = &share.file_id {
            let file: Option<File> =
                sqlx::query_as("SELECT * FROM files WHERE id = ? AND trashed_at IS NULL")
                    .bind(file_id)
                    .fetch_optional(db.pool())
                    .await?;
            let file = file.ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;
            (file.name, Some(file.size_bytes), file.mime_type)
        } else {
            let folder_id = share.folder_id.as_deref().unwrap_or_default();
            let folder: Option<Folder> =
                sqlx::query_as("SELECT * FROM folders WHERE id = ? AND deleted_at IS NULL")
                    .bind(folder_id)
                    .fetch_optional(db.pool())
                    .await?;
            let folder = folder.ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;
            (folder.name, None, None)
        };

        Ok(PublicShareInfo {
            id: share.id,
            file_id: share.file_id,
            folder_id: share.folder_id,
            target_name,
            target_size,
            mime_type,
            requires_password: share.password_hash.is_some(),
            expires_at: share.expires_at,
            max_downloads: share.max_downloads,
            download_count: share.download_count,
        })
    }

    /// Verify a candidate password. Returns false on mismatch or when the
    /// share has no password; never errors on a wrong guess.
    pub async fn validate_password(
        db: &Database,
        share_id: &str,
        candidate: &str,
    ) -> Result<bool> {
        let share = Self::get(db, share_id).await?;

        let Some(hash) = &share.password_hash else {
            return Ok(false);
        };
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Corrupt password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok())
    }

    /// Count a download. Deliberately not atomic with the ceiling check in
    /// `resolve`; under concurrency the counter may overshoot slightly.
    pub async fn record_download(db: &Database, share_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE shares SET download_count = download_count + 1 WHERE id = ?",
        )
        .bind(share_id)
        .execute(db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Share not found".to_string()));
        }
        Ok(())
    }

    /// Presigned download for a file share, counting the access.
    pub async fn download(
        db: &Database,
        store: &dyn ObjectStore,
        share_id: &str,
        ttl_secs: u64,
    ) -> Result<DownloadUrlResponse> {
        let share = Self::check_access(db, share_id).await?;
        let file_id = share
            .file_id
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("Share targets a folder".to_string()))?;

        let file: Option<File> =
            sqlx::query_as("SELECT * FROM files WHERE id = ? AND trashed_at IS NULL")
                .bind(file_id)
                .fetch_optional(db.pool())
                .await?;
        let file = file.ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;

        let url = store
            .presign_download_url(&file.object_key, Duration::from_secs(ttl_secs))
            .await?;
        Self::record_download(db, share_id).await?;

        Ok(DownloadUrlResponse {
            download_url: url,
            file_name: file.name,
            content_type: file.mime_type,
        })
    }

    pub async fn list(db: &Database, account_id: &str) -> Result<Vec<Share>> {
        let shares: Vec<Share> =
            sqlx::query_as("SELECT * FROM shares WHERE account_id = ? ORDER BY created_at DESC")
                .bind(account_id)
                .fetch_all(db.pool())
                .await?;
        Ok(shares)
    }

    pub async fn delete(db: &Database, account_id: &str, share_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM shares WHERE id = ? AND account_id = ?")
            .bind(share_id)
            .bind(account_id)
            .execute(db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Share not found".to_string()));
        }
        Ok(())
    }

    /// Scheduled sweep of shares past their expiry.
    pub async fn purge_expired(db: &Database) -> Result<u64> {
        let result = sqlx::query("DELETE FROM shares WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(now_rfc3339())
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
