use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::{
    CompleteUploadRequest, File, InitiateUploadRequest, InitiateUploadResponse, UploadPart,
    UploadSession,
};
use crate::queue::{self, JobQueue};
use crate::services::scan::ScanJobPayload;
use crate::services::{FolderService, QuotaLedger};
use crate::storage::{CompletedPart, ObjectStore};

/// S3 multipart floor for every part except the last.
const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;
/// S3 ceiling for a single part.
const MAX_PART_SIZE: i64 = 5 * 1024 * 1024 * 1024;
/// S3 allows at most 10,000 parts per upload.
const MAX_PART_COUNT: i64 = 10_000;

const PART_URL_TTL: Duration = Duration::from_secs(3600);

/// Chunked upload lifecycle: initiate (quota reserved, parts presigned),
/// complete (file row appears, scan queued) or abort, with a reaper for
/// sessions the client walked away from.
pub struct UploadService;

impl UploadService {
    /// Split `size_bytes` into (part_size, part_count). Parts are sized so
    /// the count stays within the store's 10,000-part limit.
    pub fn plan_parts(size_bytes: i64) -> Result<(i64, i64)> {
        if size_bytes < 0 {
            return Err(AppError::BadRequest("Negative file size".to_string()));
        }
        if size_bytes == 0 {
            return Ok((0, 0));
        }

        let mut part_size = (size_bytes + MAX_PART_COUNT - 1) / MAX_PART_COUNT;
        if part_size < MIN_PART_SIZE {
            part_size = MIN_PART_SIZE;
        }
        if part_size > MAX_PART_SIZE {
            return Err(AppError::BadRequest(
                "File too large for multipart upload".to_string(),
            ));
        }

        let part_count = (size_bytes + part_size - 1) / part_size;
        Ok((part_size, part_count))
    }

    /// Object keys are namespaced by account and never derived from the
    /// user-supplied name, so renames never touch the store.
    fn generate_object_key(account_id: &str, name: &str) -> String {
        let ext = name
            .rsplit_once('.')
            .map(|(_, e)| e)
            .filter(|e| !e.is_empty() && e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let nonce: u32 = rand::thread_rng().gen();
        format!(
            "{}/{}-{:08x}{}",
            account_id,
            Utc::now().timestamp_millis(),
            nonce,
            ext
        )
    }

    pub async fn initiate(
        db: &Database,
        store: &dyn ObjectStore,
        account_id: &str,
        req: InitiateUploadRequest,
        max_file_size: i64,
    ) -> Result<InitiateUploadResponse> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("File name is required".to_string()));
        }
        if req.size_bytes > max_file_size {
            return Err(AppError::BadRequest(format!(
                "File exceeds the maximum allowed size of {} bytes",
                max_file_size
            )));
        }
        let (part_size, part_count) = Self::plan_parts(req.size_bytes)?;

        if let Some(folder_id) = &req.folder_id {
            FolderService::get(db, account_id, folder_id).await?;
        }
        FolderService::ensure_name_available(
            db,
            account_id,
            req.folder_id.as_deref(),
            name,
            None,
            None,
        )
        .await?;

        // Reserve before touching the store, so a denied upload never holds
        // upstream state.
        QuotaLedger::reserve(db, account_id, req.size_bytes).await?;

        let object_key = Self::generate_object_key(account_id, name);
        let content_type = req.mime_type.as_deref().unwrap_or("application/octet-stream");

        let result = Self::open_session(
            db,
            store,
            account_id,
            name,
            &req,
            &object_key,
            content_type,
            part_size,
            part_count,
        )
        .await;

        if result.is_err() {
            if let Err(e) = QuotaLedger::release(db, account_id, req.size_bytes).await {
                tracing::error!(account_id, "quota release after failed initiate: {}", e);
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_session(
        db: &Database,
        store: &dyn ObjectStore,
        account_id: &str,
        name: &str,
        req: &InitiateUploadRequest,
        object_key: &str,
        content_type: &str,
        part_size: i64,
        part_count: i64,
    ) -> Result<InitiateUploadResponse> {
        let (upload_id, parts) = if part_count == 0 {
            // Zero-byte files skip multipart entirely; the client PUTs an
            // empty body to a plain presigned URL.
            let url = store
                .presign_put_url(object_key, content_type, PART_URL_TTL)
                .await?;
            (
                Uuid::new_v4().to_string(),
                vec![UploadPart {
                    part_number: 1,
                    start: 0,
                    end: 0,
                    presigned_url: url,
                }],
            )
        } else {
            let upload_id = store.create_multipart(object_key, content_type).await?;
            let mut parts = Vec::with_capacity(part_count as usize);
            for part_number in 1..=part_count {
                let start = (part_number - 1) * part_size;
                let end = (start + part_size - 1).min(req.size_bytes - 1);
                let url = store
                    .presign_part_url(object_key, &upload_id, part_number, PART_URL_TTL)
                    .await;
                let url = match url {
                    Ok(u) => u,
                    Err(e) => {
                        Self::abort_store(store, object_key, &upload_id, part_count).await;
                        return Err(e);
                    }
                };
                parts.push(UploadPart {
                    part_number,
                    start,
                    end,
                    presigned_url: url,
                });
            }
            (upload_id, parts)
        };

        let insert = sqlx::query(
            r#"
            INSERT INTO upload_sessions (id, account_id, folder_id, name, size_bytes,
                                         mime_type, object_key, part_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&upload_id)
        .bind(account_id)
        .bind(&req.folder_id)
        .bind(name)
        .bind(req.size_bytes)
        .bind(&req.mime_type)
        .bind(object_key)
        .bind(part_count)
        .bind(now_rfc3339())
        .execute(db.pool())
        .await;

        if let Err(e) = insert {
            Self::abort_store(store, object_key, &upload_id, part_count).await;
            return Err(e.into());
        }

        tracing::info!(
            account_id,
            upload_id = %upload_id,
            size_bytes = req.size_bytes,
            part_count,
            "upload session opened"
        );
        Ok(InitiateUploadResponse {
            upload_id,
            object_key: object_key.to_string(),
            parts,
        })
    }

    async fn session(db: &Database, account_id: &str, upload_id: &str) -> Result<UploadSession> {
        let session: Option<UploadSession> =
            sqlx::query_as("SELECT * FROM upload_sessions WHERE id = ? AND account_id = ?")
                .bind(upload_id)
                .bind(account_id)
                .fetch_optional(db.pool())
                .await?;
        session.ok_or_else(|| AppError::NotFound("Upload session not found".to_string()))
    }

    pub async fn complete(
        db: &Database,
        store: &dyn ObjectStore,
        account_id: &str,
        req: CompleteUploadRequest,
        scan_max_attempts: i64,
    ) -> Result<File> {
        let session = Self::session(db, account_id, &req.upload_id).await?;

        if session.part_count > 0 {
            if req.parts.len() as i64 != session.part_count {
                return Err(AppError::BadRequest(format!(
                    "Expected {} part etags, got {}",
                    session.part_count,
                    req.parts.len()
                )));
            }
            let mut numbers: Vec<i64> = req.parts.iter().map(|p| p.part_number).collect();
            numbers.sort_unstable();
            numbers.dedup();
            if numbers.len() as i64 != session.part_count
                || numbers.first() != Some(&1)
                || numbers.last() != Some(&session.part_count)
            {
                return Err(AppError::BadRequest(
                    "Part numbers must cover 1..=part_count exactly".to_string(),
                ));
            }
        }

        // The target folder must still be alive, and the name still free;
        // a failed check leaves the session (and its reservation) intact
        // for retry or abort.
        if let Some(folder_id) = &session.folder_id {
            FolderService::get(db, account_id, folder_id).await?;
        }
        FolderService::ensure_name_available(
            db,
            account_id,
            session.folder_id.as_deref(),
            &session.name,
            None,
            None,
        )
        .await?;

        let etag = if session.part_count > 0 {
            let completed: Vec<CompletedPart> = req
                .parts
                .iter()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect();
            match store
                .complete_multipart(&session.object_key, &session.id, &completed)
                .await
            {
                Ok(etag) => Some(etag),
                Err(e) => {
                    // The store rejected the assembly: tear the session
                    // down so the account ends where it started.
                    Self::discard_session(db, store, &session).await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let now = now_rfc3339();
        let file_id = Uuid::new_v4().to_string();
        let mut tx = db.pool().begin().await?;
        let file: File = sqlx::query_as(
            r#"
            INSERT INTO files (id, account_id, folder_id, name, size_bytes, mime_type,
                               object_key, etag, version, scan_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 'pending', ?, ?)
            RETURNING *
            "#,
        )
        .bind(&file_id)
        .bind(account_id)
        .bind(&session.folder_id)
        .bind(&session.name)
        .bind(session.size_bytes)
        .bind(&session.mime_type)
        .bind(&session.object_key)
        .bind(&etag)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(&session.id)
            .execute(&mut *tx)
            .await?;

        // The scan job commits with the file row: no file is ever visible
        // without a pending verdict and a queued scan.
        JobQueue::enqueue_in(
            &mut *tx,
            queue::kind::VIRUS_SCAN,
            &ScanJobPayload {
                account_id: account_id.to_string(),
                file_id: file_id.clone(),
                object_key: session.object_key.clone(),
                size_bytes: session.size_bytes,
            },
            scan_max_attempts,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            account_id,
            file_id = %file.id,
            size_bytes = file.size_bytes,
            "upload completed, scan queued"
        );
        Ok(file)
    }

    pub async fn abort(
        db: &Database,
        store: &dyn ObjectStore,
        account_id: &str,
        upload_id: &str,
    ) -> Result<()> {
        let session = Self::session(db, account_id, upload_id).await?;
        Self::discard_session(db, store, &session).await;
        Ok(())
    }

    /// Drop a session: release its reservation, abort the store upload
    /// (best effort) and delete the row.
    async fn discard_session(db: &Database, store: &dyn ObjectStore, session: &UploadSession) {
        if let Err(e) = QuotaLedger::release(db, &session.account_id, session.size_bytes).await {
            tracing::error!(upload_id = %session.id, "quota release on discard: {}", e);
        }
        Self::abort_store(store, &session.object_key, &session.id, session.part_count).await;
        if let Err(e) = sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(&session.id)
            .execute(db.pool())
            .await
        {
            tracing::error!(upload_id = %session.id, "session delete on discard: {}", e);
        }
    }

    async fn abort_store(store: &dyn ObjectStore, key: &str, upload_id: &str, part_count: i64) {
        if part_count == 0 {
            return;
        }
        if let Err(e) = store.abort_multipart(key, upload_id).await {
            tracing::warn!(upload_id, "multipart abort failed, store may retain parts: {}", e);
        }
    }

    /// Reap sessions older than `ttl_hours`. Each release is per-session so
    /// one bad row cannot wedge the sweep.
    pub async fn reap_stale(
        db: &Database,
        store: &dyn ObjectStore,
        ttl_hours: i64,
    ) -> Result<u64> {
        let cutoff = (Utc::now() - ChronoDuration::hours(ttl_hours))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let stale: Vec<UploadSession> =
            sqlx::query_as("SELECT * FROM upload_sessions WHERE created_at < ?")
                .bind(&cutoff)
                .fetch_all(db.pool())
                .await?;

        let mut reaped = 0;
        for session in &stale {
            Self::discard_session(db, store, session).await;
            reaped += 1;
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartEtag, Plan, ScanStatus};
    use crate::services::QuotaLedger;
    use crate::test_support::{create_account, test_db, MockStore};

    const MIB: i64 = 1024 * 1024;
    const GIB: i64 = 1024 * MIB;

    fn upload_req(name: &str, size: i64) -> InitiateUploadRequest {
        InitiateUploadRequest {
            name: name.to_string(),
            size_bytes: size,
            mime_type: Some("application/octet-stream".to_string()),
            folder_id: None,
        }
    }

    fn etags(count: i64) -> Vec<PartEtag> {
        (1..=count)
            .map(|n| PartEtag {
                part_number: n,
                etag: format!("\"etag-{}\"", n),
            })
            .collect()
    }

    async fn used_bytes(db: &Database, account: &str) -> i64 {
        sqlx::query_scalar("SELECT used_bytes FROM accounts WHERE id = ?")
            .bind(account)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[test]
    fn test_plan_parts_small_file_single_part() {
        let (size, count) = UploadService::plan_parts(3 * MIB).unwrap();
        assert_eq!(size, 5 * MIB);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_plan_parts_exact_boundary() {
        let (size, count) = UploadService::plan_parts(10 * MIB).unwrap();
        assert_eq!(size, 5 * MIB);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_plan_parts_grows_part_size_past_ten_thousand() {
        // 100 GiB at 5 MiB parts would need 20,480 parts; the planner must
        // grow the part size instead.
        let (size, count) = UploadService::plan_parts(100 * GIB).unwrap();
        assert!(count <= 10_000, "count {} exceeds limit", count);
        assert!(size >= 5 * MIB);
        assert!((count - 1) * size < 100 * GIB && count * size >= 100 * GIB);
    }

    #[test]
    fn test_plan_parts_zero_byte() {
        assert_eq!(UploadService::plan_parts(0).unwrap(), (0, 0));
    }

    #[test]
    fn test_object_key_shape() {
        let key = UploadService::generate_object_key("a1", "Report.Final.PDF");
        assert!(key.starts_with("a1/"));
        assert!(key.ends_with(".pdf"));

        let bare = UploadService::generate_object_key("a1", "noext");
        assert!(bare.starts_with("a1/"));
        assert!(!bare.contains('.'));
    }

    #[tokio::test]
    async fn test_initiate_reserves_and_presigns() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let resp = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 12 * MIB), GIB)
            .await
            .unwrap();

        assert_eq!(resp.parts.len(), 3);
        assert_eq!(resp.parts[0].start, 0);
        assert_eq!(resp.parts[0].end, 5 * MIB - 1);
        assert_eq!(resp.parts[2].end, 12 * MIB - 1);
        assert_eq!(used_bytes(&db, "a1").await, 12 * MIB);
    }

    #[tokio::test]
    async fn test_initiate_over_quota_holds_nothing() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        QuotaLedger::reserve(&db, "a1", 15 * GIB - MIB).await.unwrap();
        let store = MockStore::new();

        let err = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 10 * MIB), GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded));

        assert_eq!(used_bytes(&db, "a1").await, 15 * GIB - MIB);
        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(sessions, 0);
    }

    #[tokio::test]
    async fn test_initiate_store_failure_releases_reservation() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();
        store.fail_create.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 10 * MIB), GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(used_bytes(&db, "a1").await, 0);
    }

    #[tokio::test]
    async fn test_complete_creates_pending_file_and_scan_job() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let resp = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 12 * MIB), GIB)
            .await
            .unwrap();
        let file = UploadService::complete(
            &db,
            &store,
            "a1",
            CompleteUploadRequest {
                upload_id: resp.upload_id,
                parts: etags(3),
            },
            5,
        )
        .await
        .unwrap();

        assert_eq!(file.scan_status, ScanStatus::Pending);
        assert_eq!(file.version, 1);
        assert_eq!(used_bytes(&db, "a1").await, 12 * MIB);

        let jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE kind = 'virus_scan' AND state = 'pending'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(jobs, 1);
    }

    #[tokio::test]
    async fn test_complete_store_failure_nets_to_zero() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let resp = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 12 * MIB), GIB)
            .await
            .unwrap();
        store.fail_complete.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = UploadService::complete(
            &db,
            &store,
            "a1",
            CompleteUploadRequest {
                upload_id: resp.upload_id.clone(),
                parts: etags(3),
            },
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));

        assert_eq!(used_bytes(&db, "a1").await, 0);
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(files, 0);
        assert_eq!(store.aborted.lock().unwrap().as_slice(), &[resp.upload_id]);
    }

    #[tokio::test]
    async fn test_complete_wrong_part_count_keeps_session() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let resp = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 12 * MIB), GIB)
            .await
            .unwrap();
        let err = UploadService::complete(
            &db,
            &store,
            "a1",
            CompleteUploadRequest {
                upload_id: resp.upload_id,
                parts: etags(2),
            },
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // Reservation and session survive for a client retry.
        assert_eq!(used_bytes(&db, "a1").await, 12 * MIB);
        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(sessions, 1);
    }

    #[tokio::test]
    async fn test_zero_byte_upload() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let resp = UploadService::initiate(&db, &store, "a1", upload_req("empty.txt", 0), GIB)
            .await
            .unwrap();
        assert_eq!(resp.parts.len(), 1);
        assert!(resp.parts[0].presigned_url.starts_with("http://mock/put/"));

        let file = UploadService::complete(
            &db,
            &store,
            "a1",
            CompleteUploadRequest {
                upload_id: resp.upload_id,
                parts: vec![],
            },
            5,
        )
        .await
        .unwrap();
        assert_eq!(file.size_bytes, 0);
        assert_eq!(file.etag, None);
        assert_eq!(used_bytes(&db, "a1").await, 0);
    }

    #[tokio::test]
    async fn test_abort_releases_and_aborts() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let resp = UploadService::initiate(&db, &store, "a1", upload_req("big.bin", 12 * MIB), GIB)
            .await
            .unwrap();
        UploadService::abort(&db, &store, "a1", &resp.upload_id)
            .await
            .unwrap();

        assert_eq!(used_bytes(&db, "a1").await, 0);
        assert_eq!(store.aborted.lock().unwrap().as_slice(), &[resp.upload_id]);
    }

    #[tokio::test]
    async fn test_reap_stale_only_touches_old_sessions() {
        let db = test_db().await;
        create_account(&db, "a1", Plan::Free).await;
        let store = MockStore::new();

        let fresh = UploadService::initiate(&db, &store, "a1", upload_req("a.bin", 10 * MIB), GIB)
            .await
            .unwrap();
        let old = UploadService::initiate(&db, &store, "a1", upload_req("b.bin", 10 * MIB), GIB)
            .await
            .unwrap();
        sqlx::query("UPDATE upload_sessions SET created_at = '2000-01-01T00:00:00.000Z' WHERE id = ?")
            .bind(&old.upload_id)
            .execute(db.pool())
            .await
            .unwrap();

        let reaped = UploadService::reap_stale(&db, &store, 24).await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(used_bytes(&db, "a1").await, 10 * MIB);

        let remaining: Vec<String> = sqlx::query_scalar("SELECT id FROM upload_sessions")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, vec![fresh.upload_id]);
    }
}
