//! Shared fixtures for service tests: in-memory database, canned accounts
//! and files, and mock object-store/scanner implementations.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::Plan;
use crate::scanner::{ScanOutcome, VirusScanner};
use crate::storage::{CompletedPart, ObjectStore};

pub async fn test_db() -> Database {
    let db = Database::new_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
}

pub async fn create_account(db: &Database, id: &str, plan: Plan) {
    let now = now_rfc3339();
    sqlx::query("INSERT INTO accounts (id, plan, used_bytes, created_at, updated_at) VALUES (?, ?, 0, ?, ?)")
        .bind(id)
        .bind(plan)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
}

pub async fn insert_file(
    db: &Database,
    id: &str,
    account_id: &str,
    folder_id: Option<&str>,
    name: &str,
    size_bytes: i64,
    trashed: bool,
) {
    let now = now_rfc3339();
    let trashed_at = if trashed { Some(now.clone()) } else { None };
    sqlx::query(
        r#"
        INSERT INTO files (id, account_id, folder_id, name, size_bytes, object_key,
                           scan_status, trashed_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'clean', ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(account_id)
    .bind(folder_id)
    .bind(name)
    .bind(size_bytes)
    .bind(format!("{}/{}", account_id, id))
    .bind(trashed_at)
    .bind(&now)
    .bind(&now)
    .execute(db.pool())
    .await
    .unwrap();
}

/// Object store double: records calls, can be told to fail completion.
#[derive(Default)]
pub struct MockStore {
    pub fail_complete: AtomicBool,
    pub fail_create: AtomicBool,
    pub aborted: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn create_multipart(&self, key: &str, _content_type: &str) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("mock create failure".to_string()));
        }
        Ok(format!("upload-{}", key))
    }

    async fn presign_part_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i64,
        _ttl: Duration,
    ) -> Result<String> {
        Ok(format!("http://mock/{}/{}/{}", key, upload_id, part_number))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        _parts: &[CompletedPart],
    ) -> Result<String> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("mock complete failure".to_string()));
        }
        self.completed.lock().unwrap().push(upload_id.to_string());
        Ok(format!("etag-{}", key))
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }

    async fn presign_put_url(
        &self,
        key: &str,
        _content_type: &str,
        _ttl: Duration,
    ) -> Result<String> {
        Ok(format!("http://mock/put/{}", key))
    }

    async fn presign_download_url(&self, key: &str, _ttl: Duration) -> Result<String> {
        Ok(format!("http://mock/get/{}", key))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Scanner double returning a fixed verdict, or failing when `verdict` is
/// None (simulates an unreachable daemon).
pub struct MockScanner {
    pub verdict: Option<ScanOutcome>,
}

impl MockScanner {
    pub fn clean() -> Self {
        Self {
            verdict: Some(ScanOutcome {
                infected: false,
                virus_name: None,
                elapsed_ms: 5,
            }),
        }
    }

    pub fn infected(name: &str) -> Self {
        Self {
            verdict: Some(ScanOutcome {
                infected: true,
                virus_name: Some(name.to_string()),
                elapsed_ms: 5,
            }),
        }
    }

    pub fn unreachable() -> Self {
        Self { verdict: None }
    }
}

#[async_trait]
impl VirusScanner for MockScanner {
    async fn scan_url(&self, _url: &str) -> Result<ScanOutcome> {
        match &self.verdict {
            Some(v) => Ok(v.clone()),
            None => Err(AppError::Upstream("mock scanner unreachable".to_string())),
        }
    }

    async fn ping(&self) -> bool {
        self.verdict.is_some()
    }
}
