use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::File;

/// Folder model (self-referential tree, root = null parent)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Folder {
    pub id: String,
    pub account_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Create folder request
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub parent_id: Option<String>,
}

/// Rename / move folder request
#[derive(Debug, Deserialize)]
pub struct UpdateFolderRequest {
    pub name: Option<String>,
    pub parent_id: Option<String>,
    /// Set to move the folder to the root instead of a parent.
    #[serde(default)]
    pub move_to_root: bool,
}

/// Breadcrumb entry, root-to-leaf order
#[derive(Debug, Clone, Serialize)]
pub struct Breadcrumb {
    pub id: String,
    pub name: String,
}

/// Trash listing for an account
#[derive(Debug, Serialize)]
pub struct TrashListResponse {
    pub files: Vec<File>,
    pub folders: Vec<Folder>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Folder contents (folders first, then files)
#[derive(Debug, Serialize)]
pub struct FolderChildren {
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}
