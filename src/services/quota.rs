use sqlx::SqliteConnection;

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::{Plan, QuotaInfo};

/// Per-account consumed-bytes ledger.
///
/// `used_bytes` is adjusted by every reservation and release, never derived
/// from a live scan outside `reconcile`. Reservation is a single conditional
/// UPDATE, so two concurrent uploads cannot both slip under the quota.
pub struct QuotaLedger;

impl QuotaLedger {
    /// Reserve `delta` bytes against the account's plan quota.
    pub async fn reserve(db: &Database, account_id: &str, delta: i64) -> Result<()> {
        let mut conn = db.pool().acquire().await?;
        Self::reserve_in(&mut conn, account_id, delta).await
    }

    /// Reservation usable inside a caller-owned transaction.
    pub async fn reserve_in(
        conn: &mut SqliteConnection,
        account_id: &str,
        delta: i64,
    ) -> Result<()> {
        if delta < 0 {
            return Err(AppError::Internal(format!(
                "negative quota reservation: {}",
                delta
            )));
        }
        if delta == 0 {
            return Ok(());
        }

        let plan: Option<Plan> = sqlx::query_scalar("SELECT plan FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?;
        let plan = plan.ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;

        let result = sqlx::query(
            "UPDATE accounts SET used_bytes = used_bytes + ?1, updated_at = ?2
             WHERE id = ?3 AND used_bytes + ?1 <= ?4",
        )
        .bind(delta)
        .bind(now_rfc3339())
        .bind(account_id)
        .bind(plan.quota_bytes())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::QuotaExceeded);
        }
        Ok(())
    }

    /// Release `delta` bytes, floored at zero.
    pub async fn release(db: &Database, account_id: &str, delta: i64) -> Result<()> {
        let mut conn = db.pool().acquire().await?;
        Self::release_in(&mut conn, account_id, delta).await
    }

    /// Release usable inside a caller-owned transaction.
    pub async fn release_in(
        conn: &mut SqliteConnection,
        account_id: &str,
        delta: i64,
    ) -> Result<()> {
        if delta < 0 {
            return Err(AppError::Internal(format!(
                "negative quota release: {}",
                delta
            )));
        }
        if delta == 0 {
            return Ok(());
        }

        let used: Option<i64> = sqlx::query_scalar("SELECT used_bytes FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?;
        let used = used.ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;

        if used < delta {
            // Counter drift; clamping keeps the non-negativity invariant
            // and a later reconcile corrects the ledger.
            tracing::warn!(
                account_id,
                used_bytes = used,
                delta,
                "quota release exceeds stored usage, clamping at zero"
            );
        }

        sqlx::query(
            "UPDATE accounts SET used_bytes = MAX(0, used_bytes - ?1), updated_at = ?2
             WHERE id = ?3",
        )
        .bind(delta)
        .bind(now_rfc3339())
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Recompute `used_bytes` from the ground truth: the sum of sizes of all
    /// non-trashed files. Corrects drift from partial failures.
    pub async fn reconcile(db: &Database, account_id: &str) -> Result<i64> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(db.pool())
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound("Account not found".to_string()));
        }

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM files
             WHERE account_id = ? AND trashed_at IS NULL",
        )
        .bind(account_id)
        .fetch_one(db.pool())
        .await?;

        sqlx::query("UPDATE accounts SET used_bytes = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(actual)
            .bind(now_rfc3339())
            .bind(account_id)
            .execute(db.pool())
            .await?;

        Ok(actual)
    }

    /// Reconcile every account, returning how many were touched.
    pub async fn reconcile_all(db: &Database) -> Result<u64> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM accounts")
            .fetch_all(db.pool())
            .await?;

        let mut count = 0;
        for id in ids {
            Self::reconcile(db, &id).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Current usage against the plan quota.
    pub async fn usage(db: &Database, account_id: &str) -> Result<QuotaInfo> {
        let row: Option<(Plan, i64)> =
            sqlx::query_as("SELECT plan, used_bytes FROM accounts WHERE id = ?")
                .bind(account_id)
                .fetch_optional(db.pool())
                .await?;
        let (plan, used_bytes) =
            row.ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;

        Ok(QuotaInfo {
            used_bytes,
            quota_bytes: plan.quota_bytes(),
            plan,
        })
    }
}
