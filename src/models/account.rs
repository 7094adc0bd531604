use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const FREE_QUOTA_BYTES: i64 = 15 * 1024 * 1024 * 1024; // 15 GiB
pub const PRO_QUOTA_BYTES: i64 = 100 * 1024 * 1024 * 1024; // 100 GiB

/// Plan tier with a fixed byte quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn quota_bytes(&self) -> i64 {
        match self {
            Plan::Free => FREE_QUOTA_BYTES,
            Plan::Pro => PRO_QUOTA_BYTES,
        }
    }
}

/// Account model
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: String,
    pub plan: Plan,
    pub used_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Authenticated caller, injected by the auth middleware
#[derive(Debug, Clone)]
pub struct CurrentAccount {
    pub id: String,
}

/// Quota usage summary
#[derive(Debug, Serialize)]
pub struct QuotaInfo {
    pub used_bytes: i64,
    pub quota_bytes: i64,
    pub plan: Plan,
}
