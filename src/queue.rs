//! Durable SQLite-backed job queue with at-least-once delivery.
//!
//! Claiming is a single conditional UPDATE, so concurrent consumers never
//! take the same job. Failed jobs requeue with exponential backoff until
//! `max_attempts`, then move to a dead state requiring manual intervention.

use serde::Serialize;
use sqlx::{FromRow, SqliteConnection};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{now_rfc3339, Database};
use crate::error::Result;
use crate::services::{QuotaLedger, ScanService, ShareService, TrashService, UploadService};
use crate::AppState;

pub mod kind {
    pub const VIRUS_SCAN: &str = "virus_scan";
    pub const PURGE_SHARES: &str = "purge_shares";
    pub const RECONCILE_QUOTA: &str = "reconcile_quota";
    pub const PURGE_TRASH: &str = "purge_trash";
    pub const REAP_UPLOADS: &str = "reap_uploads";
}

#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
}

fn backoff(attempts: i64) -> chrono::Duration {
    // 30s, 60s, 120s, ... capped at an hour.
    let secs = (30i64 << (attempts - 1).clamp(0, 7)).min(3600);
    chrono::Duration::seconds(secs)
}

fn rfc3339_in(delta: chrono::Duration) -> String {
    (chrono::Utc::now() + delta).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn enqueue<P: Serialize>(
        &self,
        kind: &str,
        payload: &P,
        max_attempts: i64,
    ) -> Result<String> {
        let mut conn = self.db.pool().acquire().await?;
        Self::enqueue_in(&mut conn, kind, payload, max_attempts).await
    }

    /// Enqueue inside a caller-owned transaction, so a job becomes durable
    /// together with the rows it refers to.
    pub async fn enqueue_in<P: Serialize>(
        conn: &mut SqliteConnection,
        kind: &str,
        payload: &P,
        max_attempts: i64,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, payload, attempts, max_attempts, run_after, state, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(kind)
        .bind(serde_json::to_string(payload).map_err(|e| {
            crate::error::AppError::Internal(format!("Encode job payload: {}", e))
        })?)
        .bind(max_attempts)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(conn)
        .await?;
        Ok(id)
    }

    /// Enqueue unless a job of the same kind is already pending or running.
    /// Keeps scheduler re-triggers from piling up.
    pub async fn enqueue_unique<P: Serialize>(
        &self,
        kind: &str,
        payload: &P,
        max_attempts: i64,
    ) -> Result<Option<String>> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE kind = ? AND state IN ('pending', 'running') LIMIT 1",
        )
        .bind(kind)
        .fetch_optional(self.db.pool())
        .await?;
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(self.enqueue(kind, payload, max_attempts).await?))
    }

    /// Claim the next runnable job, if any.
    pub async fn claim(&self) -> Result<Option<Job>> {
        let now = now_rfc3339();
        let job: Option<Job> = sqlx::query_as(
            r#"
            UPDATE jobs SET state = 'running', attempts = attempts + 1, updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND run_after <= ?1
                ORDER BY run_after
                LIMIT 1
            )
            RETURNING id, kind, payload, attempts, max_attempts
            "#,
        )
        .bind(&now)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(job)
    }

    pub async fn complete(&self, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET state = 'done', updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(job_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Requeue a failed job with backoff, or dead-letter it once attempts
    /// are exhausted.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        if job.attempts >= job.max_attempts {
            tracing::error!(
                job_id = %job.id,
                kind = %job.kind,
                attempts = job.attempts,
                error,
                "job moved to dead-letter state"
            );
            sqlx::query("UPDATE jobs SET state = 'dead', last_error = ?, updated_at = ? WHERE id = ?")
                .bind(error)
                .bind(now_rfc3339())
                .bind(&job.id)
                .execute(self.db.pool())
                .await?;
            return Ok(());
        }

        let run_after = rfc3339_in(backoff(job.attempts));
        tracing::warn!(
            job_id = %job.id,
            kind = %job.kind,
            attempts = job.attempts,
            run_after = %run_after,
            error,
            "job failed, retrying with backoff"
        );
        sqlx::query(
            "UPDATE jobs SET state = 'pending', run_after = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&run_after)
        .bind(error)
        .bind(now_rfc3339())
        .bind(&job.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

async fn dispatch(state: &AppState, job: &Job) -> Result<()> {
    match job.kind.as_str() {
        kind::VIRUS_SCAN => {
            let payload = serde_json::from_str(&job.payload).map_err(|e| {
                crate::error::AppError::Internal(format!("Decode scan payload: {}", e))
            })?;
            ScanService::process(&state.db, state.store.as_ref(), state.scanner.as_ref(), &payload)
                .await
        }
        kind::PURGE_SHARES => {
            let purged = ShareService::purge_expired(&state.db).await?;
            tracing::info!(purged, "expired share purge finished");
            Ok(())
        }
        kind::RECONCILE_QUOTA => {
            let accounts = QuotaLedger::reconcile_all(&state.db).await?;
            tracing::info!(accounts, "quota reconciliation finished");
            Ok(())
        }
        kind::PURGE_TRASH => {
            let (files, folders) = TrashService::purge_expired(
                &state.db,
                state.store.as_ref(),
                state.config.trash.retention_days,
            )
            .await?;
            tracing::info!(files, folders, "scheduled trash purge finished");
            Ok(())
        }
        kind::REAP_UPLOADS => {
            let reaped = UploadService::reap_stale(
                &state.db,
                state.store.as_ref(),
                state.config.upload.session_ttl_hours,
            )
            .await?;
            tracing::info!(reaped, "stale upload session reap finished");
            Ok(())
        }
        other => Err(crate::error::AppError::Internal(format!(
            "unknown job kind: {}",
            other
        ))),
    }
}

/// Spawn `concurrency` consumer tasks pulling from the queue until shutdown.
pub fn spawn_workers(
    state: AppState,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..concurrency)
        .map(|worker| {
            let state = state.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    let job = match state.queue.claim().await {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                                _ = shutdown.changed() => break,
                            }
                        }
                        Err(e) => {
                            tracing::error!(worker, "queue claim failed: {}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                    };

                    let outcome = dispatch(&state, &job).await;
                    let result = match outcome {
                        Ok(()) => state.queue.complete(&job.id).await,
                        Err(e) if e.is_retryable() => {
                            state.queue.fail(&job, &e.to_string()).await
                        }
                        Err(e) => {
                            // Permanent failure (bad payload, unknown kind):
                            // retrying cannot help, dead-letter right away.
                            let spent = Job {
                                attempts: job.max_attempts,
                                ..job.clone()
                            };
                            state.queue.fail(&spent, &e.to_string()).await
                        }
                    };
                    if let Err(e) = result {
                        tracing::error!(worker, job_id = %job.id, "queue bookkeeping failed: {}", e);
                    }
                }
                tracing::debug!(worker, "queue worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;
    use serde_json::json;

    #[tokio::test]
    async fn test_claim_order_and_completion() {
        let db = test_db().await;
        let queue = JobQueue::new(db);

        queue
            .enqueue(kind::VIRUS_SCAN, &json!({"file_id": "f1"}), 5)
            .await
            .unwrap();

        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.kind, kind::VIRUS_SCAN);
        assert_eq!(job.attempts, 1);

        // Claimed job is invisible to other consumers.
        assert!(queue.claim().await.unwrap().is_none());

        queue.complete(&job.id).await.unwrap();
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_requeues_with_backoff() {
        let db = test_db().await;
        let queue = JobQueue::new(db);

        queue.enqueue(kind::VIRUS_SCAN, &json!({}), 5).await.unwrap();
        let job = queue.claim().await.unwrap().unwrap();
        queue.fail(&job, "scanner down").await.unwrap();

        // Back in pending but not yet runnable.
        let state: String = sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(queue.db.pool())
            .await
            .unwrap();
        assert_eq!(state, "pending");
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_attempts() {
        let db = test_db().await;
        let queue = JobQueue::new(db);

        queue.enqueue(kind::VIRUS_SCAN, &json!({}), 1).await.unwrap();
        let job = queue.claim().await.unwrap().unwrap();
        queue.fail(&job, "scanner down").await.unwrap();

        let state: String = sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(queue.db.pool())
            .await
            .unwrap();
        assert_eq!(state, "dead");
    }

    #[tokio::test]
    async fn test_enqueue_unique_skips_duplicates() {
        let db = test_db().await;
        let queue = JobQueue::new(db);

        let first = queue
            .enqueue_unique(kind::PURGE_TRASH, &json!({}), 3)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = queue
            .enqueue_unique(kind::PURGE_TRASH, &json!({}), 3)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        assert_eq!(backoff(1).num_seconds(), 30);
        assert_eq!(backoff(2).num_seconds(), 60);
        assert_eq!(backoff(3).num_seconds(), 120);
        assert_eq!(backoff(20).num_seconds(), 3600);
    }
}
