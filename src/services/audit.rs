use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::db::{now_rfc3339, Database};
use crate::error::Result;
use crate::models::AuditEntry;

/// Append-only audit trail for security-relevant events.
pub struct AuditService;

impl AuditService {
    pub async fn log(
        db: &Database,
        account_id: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, account_id, action, target_type, target_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(detail)
        .bind(now_rfc3339())
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Same as `log`, but inside a caller-held transaction so the entry
    /// commits or rolls back with the event it records.
    pub async fn log_in(
        tx: &mut Transaction<'_, Sqlite>,
        account_id: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, account_id, action, target_type, target_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(detail)
        .bind(now_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn recent(db: &Database, account_id: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let entries: Vec<AuditEntry> = sqlx::query_as(
            "SELECT * FROM audit_log WHERE account_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(db.pool())
        .await?;
        Ok(entries)
    }
}
