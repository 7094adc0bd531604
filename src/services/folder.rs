use uuid::Uuid;

use crate::db::{now_rfc3339, Database};
use crate::error::{AppError, Result};
use crate::models::{
    Breadcrumb, CreateFolderRequest, File, Folder, FolderChildren, UpdateFolderRequest,
};

/// Traversal cap. Cycle prevention in `update` keeps real trees far below
/// this; the cap only guards against corrupted parent chains.
const MAX_TREE_DEPTH: usize = 128;

/// Folder tree service: enforces sibling-name uniqueness and acyclicity
/// over the parent-pointer table.
pub struct FolderService;

impl FolderService {
    /// Fetch a live (non-deleted) folder owned by the account.
    pub async fn get(db: &Database, account_id: &str, id: &str) -> Result<Folder> {
        let folder: Option<Folder> = sqlx::query_as(
            "SELECT * FROM folders WHERE id = ? AND account_id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(account_id)
        .fetch_optional(db.pool())
        .await?;

        folder.ok_or_else(|| AppError::NotFound("Folder not found".to_string()))
    }

    /// Reject a name already used by a live sibling. Files and folders share
    /// one namespace within a parent.
    pub async fn ensure_name_available(
        db: &Database,
        account_id: &str,
        parent_id: Option<&str>,
        name: &str,
        exclude_folder: Option<&str>,
        exclude_file: Option<&str>,
    ) -> Result<()> {
        let mut conn = db.pool().acquire().await?;
        Self::ensure_name_available_in(
            &mut conn,
            account_id,
            parent_id,
            name,
            exclude_folder,
            exclude_file,
        )
        .await
    }

    /// Same check inside a caller-held connection or transaction.
    pub async fn ensure_name_available_in(
        conn: &mut sqlx::SqliteConnection,
        account_id: &str,
        parent_id: Option<&str>,
        name: &str,
        exclude_folder: Option<&str>,
        exclude_file: Option<&str>,
    ) -> Result<()> {
        let folder_clash: Option<String> = sqlx::query_scalar(
            "SELECT id FROM folders
             WHERE account_id = ? AND parent_id IS ? AND name = ? AND deleted_at IS NULL
               AND id <> ?",
        )
        .bind(account_id)
        .bind(parent_id)
        .bind(name)
        .bind(exclude_folder.unwrap_or(""))
        .fetch_optional(&mut *conn)
        .await?;

        let file_clash: Option<String> = sqlx::query_scalar(
            "SELECT id FROM files
             WHERE account_id = ? AND folder_id IS ? AND name = ? AND trashed_at IS NULL
               AND id <> ?",
        )
        .bind(account_id)
        .bind(parent_id)
        .bind(name)
        .bind(exclude_file.unwrap_or(""))
        .fetch_optional(&mut *conn)
        .await?;

        if folder_clash.is_some() || file_clash.is_some() {
            return Err(AppError::NameConflict(format!(
                "An item named \"{}\" already exists in this location",
                name
            )));
        }
        Ok(())
    }

    pub async fn create(
        db: &Database,
        account_id: &str,
        req: CreateFolderRequest,
    ) -> Result<Folder> {
        let name = req.name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(AppError::BadRequest("Invalid folder name".to_string()));
        }

        if let Some(parent_id) = &req.parent_id {
            Self::get(db, account_id, parent_id).await?;
        }

        Self::ensure_name_available(db, account_id, req.parent_id.as_deref(), name, None, None)
            .await?;

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let folder: Folder = sqlx::query_as(
            r#"
            INSERT INTO folders (id, account_id, parent_id, name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(account_id)
        .bind(&req.parent_id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .fetch_one(db.pool())
        .await?;

        Ok(folder)
    }

    /// Live contents of a folder (or the root when `folder_id` is None):
    /// folders first, then files, name-ordered.
    pub async fn list_children(
        db: &Database,
        account_id: &str,
        folder_id: Option<&str>,
        page: i64,
        limit: i64,
    ) -> Result<FolderChildren> {
        if let Some(id) = folder_id {
            Self::get(db, account_id, id).await?;
        }
        let limit = limit.clamp(1, 200);
        let offset = (page.max(1) - 1) * limit;

        let folders: Vec<Folder> = sqlx::query_as(
            "SELECT * FROM folders
             WHERE account_id = ? AND parent_id IS ? AND deleted_at IS NULL
             ORDER BY name ASC LIMIT ? OFFSET ?",
        )
        .bind(account_id)
        .bind(folder_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db.pool())
        .await?;

        let files: Vec<File> = sqlx::query_as(
            "SELECT * FROM files
             WHERE account_id = ? AND folder_id IS ? AND trashed_at IS NULL
             ORDER BY name ASC LIMIT ? OFFSET ?",
        )
        .bind(account_id)
        .bind(folder_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db.pool())
        .await?;

        let total_folders: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM folders WHERE account_id = ? AND parent_id IS ? AND deleted_at IS NULL",
        )
        .bind(account_id)
        .bind(folder_id)
        .fetch_one(db.pool())
        .await?;
        let total_files: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE account_id = ? AND folder_id IS ? AND trashed_at IS NULL",
        )
        .bind(account_id)
        .bind(folder_id)
        .fetch_one(db.pool())
        .await?;

        Ok(FolderChildren {
            folders,
            files,
            total: total_folders + total_files,
            page: page.max(1),
            limit,
        })
    }

    /// Walk parent references upward, returning root-to-leaf order.
    pub async fn breadcrumbs(
        db: &Database,
        account_id: &str,
        id: &str,
    ) -> Result<Vec<Breadcrumb>> {
        let mut crumbs = Vec::new();
        let mut current = Self::get(db, account_id, id).await?;

        for _ in 0..MAX_TREE_DEPTH {
            crumbs.push(Breadcrumb {
                id: current.id.clone(),
                name: current.name.clone(),
            });
            match &current.parent_id {
                Some(parent_id) => {
                    current = Self::get(db, account_id, parent_id).await?;
                }
                None => {
                    crumbs.reverse();
                    return Ok(crumbs);
                }
            }
        }

        Err(AppError::Internal(format!(
            "folder chain exceeds depth {} (corrupt tree?)",
            MAX_TREE_DEPTH
        )))
    }

    /// True if `candidate` is `folder_id` itself or one of its descendants.
    /// Walks the candidate's ancestor chain; a deleted ancestor fails closed
    /// as NotFound (the subtree is mid-deletion).
    async fn would_cycle(
        db: &Database,
        account_id: &str,
        folder_id: &str,
        candidate: &str,
    ) -> Result<bool> {
        let mut cursor = candidate.to_string();
        for _ in 0..MAX_TREE_DEPTH {
            if cursor == folder_id {
                return Ok(true);
            }
            let parent = Self::get(db, account_id, &cursor).await?.parent_id;
            match parent {
                Some(p) => cursor = p,
                None => return Ok(false),
            }
        }
        Err(AppError::Internal(format!(
            "folder chain exceeds depth {} (corrupt tree?)",
            MAX_TREE_DEPTH
        )))
    }

    /// Rename and/or move a folder.
    pub async fn update(
        db: &Database,
        account_id: &str,
        id: &str,
        req: UpdateFolderRequest,
    ) -> Result<Folder> {
        let folder = Self::get(db, account_id, id).await?;

        let new_parent: Option<String> = if req.move_to_root {
            None
        } else if let Some(parent_id) = &req.parent_id {
            Self::get(db, account_id, parent_id).await?;
            if Self::would_cycle(db, account_id, id, parent_id).await? {
                return Err(AppError::CyclicMove);
            }
            Some(parent_id.clone())
        } else {
            folder.parent_id.clone()
        };

        let new_name = match &req.name {
            Some(name) => {
                let name = name.trim();
                if name.is_empty() || name.contains('/') {
                    return Err(AppError::BadRequest("Invalid folder name".to_string()));
                }
                name.to_string()
            }
            None => folder.name.clone(),
        };

        if new_name != folder.name || new_parent != folder.parent_id {
            Self::ensure_name_available(
                db,
                account_id,
                new_parent.as_deref(),
                &new_name,
                Some(id),
                None,
            )
            .await?;
        }

        let updated: Folder = sqlx::query_as(
            "UPDATE folders SET name = ?, parent_id = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&new_name)
        .bind(&new_parent)
        .bind(now_rfc3339())
        .bind(id)
        .fetch_one(db.pool())
        .await?;

        Ok(updated)
    }

    /// Enumerate live descendant folder ids breadth-first (excluding the
    /// root of the walk).
    pub async fn descendant_ids(
        db: &Database,
        account_id: &str,
        folder_id: &str,
    ) -> Result<Vec<String>> {
        let mut descendants = Vec::new();
        let mut queue = std::collections::VecDeque::from([folder_id.to_string()]);

        while let Some(current) = queue.pop_front() {
            let children: Vec<String> = sqlx::query_scalar(
                "SELECT id FROM folders WHERE account_id = ? AND parent_id = ? AND deleted_at IS NULL",
            )
            .bind(account_id)
            .bind(&current)
            .fetch_all(db.pool())
            .await?;

            for child in children {
                descendants.push(child.clone());
                queue.push_back(child);
            }
            if descendants.len() > 100_000 {
                return Err(AppError::Internal(
                    "folder subtree too large to enumerate".to_string(),
                ));
            }
        }

        Ok(descendants)
    }

    /// Soft-delete the folder and every descendant folder, each stamped with
    /// its own timestamp. Files inside are left to the trash lifecycle.
    pub async fn remove(db: &Database, account_id: &str, id: &str) -> Result<u64> {
        Self::get(db, account_id, id).await?;
        let descendants = Self::descendant_ids(db, account_id, id).await?;

        let mut tx = db.pool().begin().await?;
        let mut stamped = 0u64;
        for folder_id in descendants.iter().chain(std::iter::once(&id.to_string())) {
            sqlx::query("UPDATE folders SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now_rfc3339())
                .bind(now_rfc3339())
                .bind(folder_id)
                .execute(&mut *tx)
                .await?;
            stamped += 1;
        }
        tx.commit().await?;

        Ok(stamped)
    }
}
