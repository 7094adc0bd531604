use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::{now_rfc3339, Database};
use crate::error::Result;
use crate::models::{File, ScanStatus};
use crate::scanner::VirusScanner;
use crate::services::{AuditService, QuotaLedger};
use crate::storage::ObjectStore;

/// Presigned download handed to the scanner; generous enough for a large
/// file to stream through clamd.
const SCAN_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanJobPayload {
    pub account_id: String,
    pub file_id: String,
    pub object_key: String,
    pub size_bytes: i64,
}

/// Post-upload virus scanning. Files are born `pending` and only ever move
/// to `clean` or `infected`; a scanner outage keeps them pending and lets
/// the queue retry.
pub struct ScanService;

impl ScanService {
    pub async fn process(
        db: &Database,
        store: &dyn ObjectStore,
        scanner: &dyn VirusScanner,
        payload: &ScanJobPayload,
    ) -> Result<()> {
        let file: Option<File> = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(&payload.file_id)
            .fetch_optional(db.pool())
            .await?;

        // The file may have been trashed, purged or already judged between
        // enqueue and claim; none of those are worth a retry.
        let Some(file) = file else {
            tracing::debug!(file_id = %payload.file_id, "scan skipped, file is gone");
            return Ok(());
        };
        if file.scan_status != ScanStatus::Pending || file.trashed_at.is_some() {
            tracing::debug!(file_id = %file.id, "scan skipped, verdict no longer applicable");
            return Ok(());
        }

        let url = store
            .presign_download_url(&payload.object_key, SCAN_URL_TTL)
            .await?;
        let outcome = scanner.scan_url(&url).await?;

        if outcome.infected {
            let virus = outcome
                .virus_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(
                account_id = %payload.account_id,
                file_id = %file.id,
                virus = %virus,
                elapsed_ms = outcome.elapsed_ms,
                "infected file quarantined"
            );
            Self::apply_infected(db, payload, &virus).await
        } else {
            tracing::info!(
                file_id = %file.id,
                elapsed_ms = outcome.elapsed_ms,
                "scan clean"
            );
            Self::apply_clean(db, &payload.file_id).await
        }
    }

    async fn apply_clean(db: &Database, file_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE files SET scan_status = 'clean', updated_at = ?
             WHERE id = ? AND scan_status = 'pending' AND trashed_at IS NULL",
        )
        .bind(now_rfc3339())
        .bind(file_id)
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Quarantine in one transaction: verdict, trash stamp, quota release
    /// and audit entry all land together or not at all.
    async fn apply_infected(db: &Database, payload: &ScanJobPayload, virus: &str) -> Result<()> {
        let now = now_rfc3339();
        let mut tx = db.pool().begin().await?;

        let updated = sqlx::query(
            "UPDATE files SET scan_status = 'infected', virus_name = ?, trashed_at = ?, updated_at = ?
             WHERE id = ? AND scan_status = 'pending' AND trashed_at IS NULL",
        )
        .bind(virus)
        .bind(&now)
        .bind(&now)
        .bind(&payload.file_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            // Lost the race with a trash/purge; nothing to account for.
            return Ok(());
        }

        QuotaLedger::release_in(&mut *tx, &payload.account_id, payload.size_bytes).await?;
        AuditService::log_in(
            &mut tx,
            &payload.account_id,
            "FILE_VIRUS_DETECTED",
            "file",
            &payload.file_id,
            Some(virus),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Re-enqueue scans for files stuck in `pending` with no live job, for
    /// operators recovering from a lost queue or a crashed worker pool.
    pub async fn sweep_pending(
        db: &Database,
        queue: &crate::queue::JobQueue,
        max_attempts: i64,
    ) -> Result<u64> {
        let files: Vec<File> = sqlx::query_as(
            "SELECT * FROM files WHERE scan_status = 'pending' AND trashed_at IS NULL",
        )
        .fetch_all(db.pool())
        .await?;

        let mut enqueued = 0u64;
        for file in files {
            let live: Option<String> = sqlx::query_scalar(
                "SELECT id FROM jobs
                 WHERE kind = ? AND state IN ('pending', 'running')
                   AND json_extract(payload, '$.file_id') = ?
                 LIMIT 1",
            )
            .bind(crate::queue::kind::VIRUS_SCAN)
            .bind(&file.id)
            .fetch_optional(db.pool())
            .await?;
            if live.is_some() {
                continue;
            }

            queue
                .enqueue(
                    crate::queue::kind::VIRUS_SCAN,
                    &ScanJobPayload {
                        account_id: file.account_id,
                        file_id: file.id,
                        object_key: file.object_key,
                        size_bytes: file.size_bytes,
                    },
                    max_attempts,
                )
                .await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::Plan;
    use crate::test_support::{create_account, test_db, MockScanner, MockStore};

    async fn insert_pending(db: &Database, id: &str, account: &str, size: i64) {
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO files (id, account_id, name, size_bytes, object_key,
                               scan_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(id)
        .bind(account)
        .bind(format!("{}.bin", id))
        .bind(size)
        .bind(format!("{}/{}", account, id))
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
        QuotaLedger::reserve(db, account, size).await.unwrap();
    }

    fn payload(account: &str, file: &str, size: i64) -> ScanJobPayload {
        ScanJobPayload {
            account_id: account.to_string(),
            file_id: file.to_string(),
            object_key: format!("{}/{}", account, file),
            size_bytes: size,
        }
    }

    async fn file_row(db: &Database, id: &str) -> File {
        sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    async fn used_bytes(db: &Database, account: &str) -> i64 {
        sqlx::query_scalar("SELECT used_bytes FROM accounts WHERE id = ?")
            .bind(account)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_clean_verdict() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_pending(&db, "f1", "a1", 1000).await;

        ScanService::process(&db, &MockStore::new(), &MockScanner::clean(), &payload("a1", "f1", 1000))
            .await
            .unwrap();

        let file = file_row(&db, "f1").await;
        assert_eq!(file.scan_status, ScanStatus::Clean);
        assert_eq!(file.trashed_at, None);
        assert_eq!(used_bytes(&db, "a1").await, 1000);
    }

    #[tokio::test]
    async fn test_infected_verdict_quarantines_atomically() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_pending(&db, "f1", "a1", 1000).await;

        ScanService::process(
            &db,
            &MockStore::new(),
            &MockScanner::infected("Eicar-Test-Signature"),
            &payload("a1", "f1", 1000),
        )
        .await
        .unwrap();

        let file = file_row(&db, "f1").await;
        assert_eq!(file.scan_status, ScanStatus::Infected);
        assert_eq!(file.virus_name.as_deref(), Some("Eicar-Test-Signature"));
        assert!(file.trashed_at.is_some());
        assert_eq!(used_bytes(&db, "a1").await, 0);

        let audits: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_log WHERE action = 'FILE_VIRUS_DETECTED' AND target_id = 'f1'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(audits, 1);
    }

    #[tokio::test]
    async fn test_unreachable_scanner_keeps_pending() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        insert_pending(&db, "f1", "a1", 1000).await;

        let err = ScanService::process(
            &db,
            &MockStore::new(),
            &MockScanner::unreachable(),
            &payload("a1", "f1", 1000),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));

        let file = file_row(&db, "f1").await;
        assert_eq!(file.scan_status, ScanStatus::Pending);
        assert_eq!(used_bytes(&db, "a1").await, 1000);
    }

    #[tokio::test]
    async fn test_missing_or_judged_file_is_noop() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;

        // Gone entirely.
        ScanService::process(&db, &MockStore::new(), &MockScanner::clean(), &payload("a1", "nope", 10))
            .await
            .unwrap();

        // Already clean; an infected verdict arriving late must not flip it.
        insert_pending(&db, "f1", "a1", 1000).await;
        ScanService::apply_clean(&db, "f1").await.unwrap();
        ScanService::process(
            &db,
            &MockStore::new(),
            &MockScanner::infected("Eicar-Test-Signature"),
            &payload("a1", "f1", 1000),
        )
        .await
        .unwrap();

        let file = file_row(&db, "f1").await;
        assert_eq!(file.scan_status, ScanStatus::Clean);
        assert_eq!(used_bytes(&db, "a1").await, 1000);
    }

    #[tokio::test]
    async fn test_sweep_pending_requeues_only_orphans() {
        let db = test_db().await;
        let queue = crate::queue::JobQueue::new(db.clone());
        create_account(&db, "a1", Plan::Free).await;

        insert_pending(&db, "f1", "a1", 100).await;
        insert_pending(&db, "f2", "a1", 200).await;
        ScanService::apply_clean(&db, "f2").await.unwrap();

        // f1 is pending with no job, f2 is already judged.
        assert_eq!(ScanService::sweep_pending(&db, &queue, 5).await.unwrap(), 1);

        // The freshly enqueued job keeps a second sweep from duplicating it.
        assert_eq!(ScanService::sweep_pending(&db, &queue, 5).await.unwrap(), 0);

        let jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE kind = 'virus_scan'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(jobs, 1);
    }
}
