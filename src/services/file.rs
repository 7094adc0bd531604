use std::time::Duration;

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::{DownloadUrlResponse, File, FileListResponse, UpdateFileRequest};
use crate::services::FolderService;
use crate::storage::ObjectStore;

/// File metadata service. Byte content lives in the object store; these
/// operations only touch rows.
pub struct FileService;

impl FileService {
    /// Fetch a live (non-trashed) file owned by the account.
    pub async fn get(db: &Database, account_id: &str, id: &str) -> Result<File> {
        let file: Option<File> = sqlx::query_as(
            "SELECT * FROM files WHERE id = ? AND account_id = ? AND trashed_at IS NULL",
        )
        .bind(id)
        .bind(account_id)
        .fetch_optional(db.pool())
        .await?;

        file.ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    pub async fn list(
        db: &Database,
        account_id: &str,
        folder_id: Option<&str>,
        page: i64,
        limit: i64,
    ) -> Result<FileListResponse> {
        if let Some(id) = folder_id {
            FolderService::get(db, account_id, id).await?;
        }
        let limit = limit.clamp(1, 200);
        let offset = (page.max(1) - 1) * limit;

        let items: Vec<File> = sqlx::query_as(
            "SELECT * FROM files
             WHERE account_id = ? AND folder_id IS ? AND trashed_at IS NULL
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(account_id)
        .bind(folder_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db.pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE account_id = ? AND folder_id IS ? AND trashed_at IS NULL",
        )
        .bind(account_id)
        .bind(folder_id)
        .fetch_one(db.pool())
        .await?;

        Ok(FileListResponse {
            items,
            total,
            page: page.max(1),
            limit,
        })
    }

    /// Rename and/or move a file. Size, key and etag are immutable.
    pub async fn update(
        db: &Database,
        account_id: &str,
        id: &str,
        req: UpdateFileRequest,
    ) -> Result<File> {
        let file = Self::get(db, account_id, id).await?;

        let new_folder: Option<String> = if req.move_to_root {
            None
        } else if let Some(folder_id) = &req.folder_id {
            FolderService::get(db, account_id, folder_id).await?;
            Some(folder_id.clone())
        } else {
            file.folder_id.clone()
        };

        let new_name = match &req.name {
            Some(name) => {
                let name = name.trim();
                if name.is_empty() || name.contains('/') {
                    return Err(AppError::BadRequest("Invalid file name".to_string()));
                }
                name.to_string()
            }
            None => file.name.clone(),
        };

        if new_name != file.name || new_folder != file.folder_id {
            FolderService::ensure_name_available(
                db,
                account_id,
                new_folder.as_deref(),
                &new_name,
                None,
                Some(id),
            )
            .await?;
        }

        let updated: File = sqlx::query_as(
            "UPDATE files SET name = ?, folder_id = ?, version = version + 1, updated_at = ?
             WHERE id = ? RETURNING *",
        )
        .bind(&new_name)
        .bind(&new_folder)
        .bind(now_rfc3339())
        .bind(id)
        .fetch_one(db.pool())
        .await?;

        Ok(updated)
    }

    /// Presigned download link. Pending files are downloadable by the owner
    /// but flagged via `scan_status`; infected files are trashed at verdict
    /// time and therefore unreachable here.
    pub async fn download_url(
        db: &Database,
        store: &dyn ObjectStore,
        account_id: &str,
        id: &str,
        ttl_secs: u64,
    ) -> Result<DownloadUrlResponse> {
        let file = Self::get(db, account_id, id).await?;
        let url = store
            .presign_download_url(&file.object_key, Duration::from_secs(ttl_secs))
            .await?;

        Ok(DownloadUrlResponse {
            download_url: url,
            file_name: file.name,
            content_type: file.mime_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateFolderRequest, Plan};
    use crate::test_support::{create_account, insert_file, test_db, MockStore};

    #[tokio::test]
    async fn test_get_excludes_trashed_and_foreign() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        create_account(&db, "a2", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "live.bin", 10, false).await;
        insert_file(&db, "f2", "a1", None, "gone.bin", 10, true).await;

        assert!(FileService::get(&db, "a1", "f1").await.is_ok());
        assert!(matches!(
            FileService::get(&db, "a1", "f2").await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            FileService::get(&db, "a2", "f1").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_rename_conflict() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "a.txt", 10, false).await;
        insert_file(&db, "f2", "a1", None, "b.txt", 10, false).await;

        let err = FileService::update(
            &db,
            "a1",
            "f2",
            UpdateFileRequest {
                name: Some("a.txt".to_string()),
                folder_id: None,
                move_to_root: false,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NameConflict(_)));
    }

    #[tokio::test]
    async fn test_move_into_folder_bumps_version() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "a.txt", 10, false).await;
        let folder = crate::services::FolderService::create(
            &db,
            "a1",
            CreateFolderRequest {
                name: "Docs".to_string(),
                parent_id: None,
            },
        )
        .await
        .unwrap();

        let updated = FileService::update(
            &db,
            "a1",
            "f1",
            UpdateFileRequest {
                name: None,
                folder_id: Some(folder.id.clone()),
                move_to_root: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.folder_id.as_deref(), Some(folder.id.as_str()));
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_download_url_uses_object_key() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "a.txt", 10, false).await;

        let store = MockStore::new();
        let resp = FileService::download_url(&db, &store, "a1", "f1", 600)
            .await
            .unwrap();
        assert_eq!(resp.download_url, "http://mock/get/a1/f1");
        assert_eq!(resp.file_name, "a.txt");
    }
}
