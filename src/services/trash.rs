use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::{File, Folder, TrashListResponse};
use crate::services::{FolderService, QuotaLedger};
use crate::storage::ObjectStore;

/// Soft-delete / restore / hard-purge lifecycle for files and folders.
///
/// Trashing a file and releasing its bytes commit in one transaction, so a
/// crash can never durably separate the two.
pub struct TrashService;

impl TrashService {
    /// Move a file to the trash and release its size from the ledger.
    pub async fn trash_file(db: &Database, account_id: &str, file_id: &str) -> Result<()> {
        let mut tx = db.pool().begin().await?;

        let file: Option<File> = sqlx::query_as(
            "SELECT * FROM files WHERE id = ? AND account_id = ? AND trashed_at IS NULL",
        )
        .bind(file_id)
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;
        let file = file.ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        sqlx::query("UPDATE files SET trashed_at = ?, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(now_rfc3339())
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        QuotaLedger::release_in(&mut tx, account_id, file.size_bytes).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Restore a trashed file. Re-reserves its size; fails with
    /// QuotaExceeded (file stays trashed) if the headroom is gone, and with
    /// NameConflict if a live sibling took the name in the meantime.
    pub async fn restore_file(db: &Database, account_id: &str, file_id: &str) -> Result<File> {
        let mut tx = db.pool().begin().await?;

        let file: Option<File> = sqlx::query_as(
            "SELECT * FROM files WHERE id = ? AND account_id = ? AND trashed_at IS NOT NULL",
        )
        .bind(file_id)
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;
        let file = file.ok_or_else(|| AppError::NotFound("File not found in trash".to_string()))?;

        FolderService::ensure_name_available_in(
            &mut tx,
            account_id,
            file.folder_id.as_deref(),
            &file.name,
            None,
            Some(file_id),
        )
        .await?;

        QuotaLedger::reserve_in(&mut tx, account_id, file.size_bytes).await?;

        let restored: File = sqlx::query_as(
            "UPDATE files SET trashed_at = NULL, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(now_rfc3339())
        .bind(file_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(restored)
    }

    /// Restore a deleted folder subtree. The ancestor chain above it must
    /// be live, otherwise the restore target would be invisible.
    pub async fn restore_folder(db: &Database, account_id: &str, folder_id: &str) -> Result<u64> {
        let folder: Option<Folder> = sqlx::query_as(
            "SELECT * FROM folders WHERE id = ? AND account_id = ? AND deleted_at IS NOT NULL",
        )
        .bind(folder_id)
        .bind(account_id)
        .fetch_optional(db.pool())
        .await?;
        let folder =
            folder.ok_or_else(|| AppError::NotFound("Folder not found in trash".to_string()))?;

        if let Some(parent_id) = &folder.parent_id {
            // Fails with NotFound when the parent is itself deleted.
            FolderService::get(db, account_id, parent_id).await?;
        }

        // A live sibling may have taken the name while the subtree sat in
        // the trash. Descendants keep their uniqueness from deletion time:
        // nothing new can be created under a deleted folder.
        FolderService::ensure_name_available(
            db,
            account_id,
            folder.parent_id.as_deref(),
            &folder.name,
            Some(folder_id),
            None,
        )
        .await?;

        // Clear the subtree breadth-first: deleted descendants come back
        // with their root.
        let mut restored = 0u64;
        let mut queue = std::collections::VecDeque::from([folder_id.to_string()]);
        let mut tx = db.pool().begin().await?;
        while let Some(current) = queue.pop_front() {
            let result = sqlx::query(
                "UPDATE folders SET deleted_at = NULL, updated_at = ? WHERE id = ? AND deleted_at IS NOT NULL",
            )
            .bind(now_rfc3339())
            .bind(&current)
            .execute(&mut *tx)
            .await?;
            restored += result.rows_affected();

            let children: Vec<String> = sqlx::query_scalar(
                "SELECT id FROM folders WHERE account_id = ? AND parent_id = ? AND deleted_at IS NOT NULL",
            )
            .bind(account_id)
            .bind(&current)
            .fetch_all(&mut *tx)
            .await?;
            queue.extend(children);
        }
        tx.commit().await?;

        Ok(restored)
    }

    pub async fn list(
        db: &Database,
        account_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<TrashListResponse> {
        let limit = limit.clamp(1, 200);
        let offset = (page.max(1) - 1) * limit;

        let files: Vec<File> = sqlx::query_as(
            "SELECT * FROM files WHERE account_id = ? AND trashed_at IS NOT NULL
             ORDER BY trashed_at DESC LIMIT ? OFFSET ?",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db.pool())
        .await?;

        let folders: Vec<Folder> = sqlx::query_as(
            "SELECT * FROM folders WHERE account_id = ? AND deleted_at IS NOT NULL
             ORDER BY deleted_at DESC LIMIT ? OFFSET ?",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db.pool())
        .await?;

        let total_files: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE account_id = ? AND trashed_at IS NOT NULL",
        )
        .bind(account_id)
        .fetch_one(db.pool())
        .await?;
        let total_folders: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM folders WHERE account_id = ? AND deleted_at IS NOT NULL",
        )
        .bind(account_id)
        .fetch_one(db.pool())
        .await?;

        Ok(TrashListResponse {
            files,
            folders,
            total: total_files + total_folders,
            page: page.max(1),
            limit,
        })
    }

    /// Hard-delete everything in the account's trash. Blob deletion is
    /// best-effort; bytes were already released at trash time, so no quota
    /// change happens here.
    pub async fn empty(
        db: &Database,
        store: &dyn ObjectStore,
        account_id: &str,
    ) -> Result<(u64, u64)> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT object_key FROM files WHERE account_id = ? AND trashed_at IS NOT NULL",
        )
        .bind(account_id)
        .fetch_all(db.pool())
        .await?;

        for key in &keys {
            if let Err(e) = store.delete_object(key).await {
                tracing::warn!(key, "blob delete failed during empty-trash: {}", e);
            }
        }

        let mut tx = db.pool().begin().await?;
        let files = sqlx::query("DELETE FROM files WHERE account_id = ? AND trashed_at IS NOT NULL")
            .bind(account_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let folders =
            sqlx::query("DELETE FROM folders WHERE account_id = ? AND deleted_at IS NOT NULL")
                .bind(account_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        tx.commit().await?;

        Ok((files, folders))
    }

    /// Scheduled purge: hard-delete items trashed longer than the retention
    /// window, across all accounts. Idempotent; quota was already released
    /// at trash time.
    pub async fn purge_expired(
        db: &Database,
        store: &dyn ObjectStore,
        retention_days: i64,
    ) -> Result<(u64, u64)> {
        let cutoff = (Utc::now() - ChronoDuration::days(retention_days))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let keys: Vec<String> =
            sqlx::query_scalar("SELECT object_key FROM files WHERE trashed_at < ?")
                .bind(&cutoff)
                .fetch_all(db.pool())
                .await?;
        for key in &keys {
            if let Err(e) = store.delete_object(key).await {
                tracing::warn!(key, "blob delete failed during trash purge: {}", e);
            }
        }

        let files = sqlx::query("DELETE FROM files WHERE trashed_at < ?")
            .bind(&cutoff)
            .execute(db.pool())
            .await?
            .rows_affected();
        let folders = sqlx::query("DELETE FROM folders WHERE deleted_at < ?")
            .bind(&cutoff)
            .execute(db.pool())
            .await?
            .rows_affected();

        Ok((files, folders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateFolderRequest, Plan};
    use crate::services::FolderService;
    use crate::test_support::{create_account, insert_file, test_db, MockStore};

    const MIB: i64 = 1024 * 1024;

    async fn used(db: &Database, account: &str) -> i64 {
        QuotaLedger::usage(db, account).await.unwrap().used_bytes
    }

    #[tokio::test]
    async fn test_trash_releases_quota_atomically() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "big.bin", 10 * MIB, false).await;
        QuotaLedger::reserve(&db, "a1", 10 * MIB).await.unwrap();

        TrashService::trash_file(&db, "a1", "f1").await.unwrap();
        assert_eq!(used(&db, "a1").await, 0);

        // Re-trashing is NotFound, not a double release.
        let err = TrashService::trash_file(&db, "a1", "f1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(used(&db, "a1").await, 0);
    }

    #[tokio::test]
    async fn test_restore_with_headroom_succeeds() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "big.bin", 10 * MIB, true).await;

        // Fill the quota to leave exactly 10 MiB of headroom.
        let quota = Plan::Free.quota_bytes();
        QuotaLedger::reserve(&db, "a1", quota - 10 * MIB).await.unwrap();

        let restored = TrashService::restore_file(&db, "a1", "f1").await.unwrap();
        assert!(restored.trashed_at.is_none());
        assert_eq!(used(&db, "a1").await, quota);
    }

    #[tokio::test]
    async fn test_restore_without_headroom_stays_trashed() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "big.bin", 10 * MIB, true).await;

        let quota = Plan::Free.quota_bytes();
        QuotaLedger::reserve(&db, "a1", quota - 5 * MIB).await.unwrap();

        let err = TrashService::restore_file(&db, "a1", "f1").await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded));

        let trashed_at: Option<String> =
            sqlx::query_scalar("SELECT trashed_at FROM files WHERE id = 'f1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert!(trashed_at.is_some());
        assert_eq!(used(&db, "a1").await, quota - 5 * MIB);
    }

    #[tokio::test]
    async fn test_restore_into_taken_name_conflicts() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "a.txt", MIB, false).await;
        QuotaLedger::reserve(&db, "a1", MIB).await.unwrap();

        TrashService::trash_file(&db, "a1", "f1").await.unwrap();
        // A new live sibling takes the name before the restore.
        insert_file(&db, "f2", "a1", None, "a.txt", MIB, false).await;
        QuotaLedger::reserve(&db, "a1", MIB).await.unwrap();

        let err = TrashService::restore_file(&db, "a1", "f1").await.unwrap_err();
        assert!(matches!(err, AppError::NameConflict(_)));

        // The file stays trashed and no bytes were re-reserved.
        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE name = 'a.txt' AND trashed_at IS NULL",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(live, 1);
        assert_eq!(used(&db, "a1").await, MIB);
    }

    #[tokio::test]
    async fn test_restore_folder_into_taken_name_conflicts() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;

        let old = FolderService::create(
            &db,
            "a1",
            CreateFolderRequest {
                name: "Docs".to_string(),
                parent_id: None,
            },
        )
        .await
        .unwrap();
        FolderService::remove(&db, "a1", &old.id).await.unwrap();

        // Deleting freed the name; a replacement folder claims it.
        FolderService::create(
            &db,
            "a1",
            CreateFolderRequest {
                name: "Docs".to_string(),
                parent_id: None,
            },
        )
        .await
        .unwrap();

        let err = TrashService::restore_folder(&db, "a1", &old.id).await.unwrap_err();
        assert!(matches!(err, AppError::NameConflict(_)));
    }

    #[tokio::test]
    async fn test_empty_trash_deletes_blobs_and_rows() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "one.bin", MIB, true).await;
        insert_file(&db, "f2", "a1", None, "two.bin", MIB, true).await;
        insert_file(&db, "f3", "a1", None, "live.bin", MIB, false).await;

        let store = MockStore::new();
        let (files, folders) = TrashService::empty(&db, &store, "a1").await.unwrap();
        assert_eq!(files, 2);
        assert_eq!(folders, 0);

        let deleted = store.deleted.lock().unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(file_row_count(&db).await == 1);
    }

    async fn file_row_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_purge_expired_is_idempotent() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_file(&db, "f1", "a1", None, "fresh.bin", MIB, true).await;

        let store = MockStore::new();
        // Nothing is older than the retention window.
        let (files, folders) = TrashService::purge_expired(&db, &store, 30).await.unwrap();
        assert_eq!((files, folders), (0, 0));
        assert_eq!(used(&db, "a1").await, 0);

        // Age the tombstone past the window and purge twice.
        sqlx::query("UPDATE files SET trashed_at = '2000-01-01T00:00:00.000Z' WHERE id = 'f1'")
            .execute(db.pool())
            .await
            .unwrap();
        let (files, _) = TrashService::purge_expired(&db, &store, 30).await.unwrap();
        assert_eq!(files, 1);
        let (files, _) = TrashService::purge_expired(&db, &store, 30).await.unwrap();
        assert_eq!(files, 0);
    }

    #[tokio::test]
    async fn test_restore_folder_requires_live_parent() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;

        let a = FolderService::create(
            &db,
            "a1",
            CreateFolderRequest {
                name: "A".to_string(),
                parent_id: None,
            },
        )
        .await
        .unwrap();
        let b = FolderService::create(
            &db,
            "a1",
            CreateFolderRequest {
                name: "B".to_string(),
                parent_id: Some(a.id.clone()),
            },
        )
        .await
        .unwrap();

        FolderService::remove(&db, "a1", &a.id).await.unwrap();

        // B's parent is deleted: restoring B alone fails closed.
        let err = TrashService::restore_folder(&db, "a1", &b.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Restoring from the subtree root brings both back.
        let restored = TrashService::restore_folder(&db, "a1", &a.id).await.unwrap();
        assert_eq!(restored, 2);
    }
}
