//! Group record CRUD and completion queries.

use crate::error::DatabaseError;
use crate::types::GroupId;
use crate::{Error, Result};

use super::{Database, GroupRecord, NewGroup};

const GROUP_COLUMNS: &str = r#"
    id, group_hash, kind, source_url, dir_path, options,
    member_count, is_complete, created_at
"#;

impl Database {
    /// Insert a new group record
    pub async fn insert_group(&self, group: &NewGroup) -> Result<GroupId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO groups (
                group_hash, kind, source_url, dir_path, options,
                member_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&group.group_hash)
        .bind(group.kind)
        .bind(&group.source_url)
        .bind(&group.dir_path)
        .bind(&group.options)
        .bind(group.member_count)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert group: {}",
                e
            )))
        })?;

        Ok(GroupId(result.last_insert_rowid()))
    }

    /// Get a group by ID
    pub async fn get_group(&self, id: GroupId) -> Result<Option<GroupRecord>> {
        let row = sqlx::query_as::<_, GroupRecord>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get group: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Find a group by its deterministic identity hash
    pub async fn find_group_by_hash(&self, group_hash: &str) -> Result<Option<GroupRecord>> {
        let row = sqlx::query_as::<_, GroupRecord>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE group_hash = ?"
        ))
        .bind(group_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find group by hash: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all groups
    pub async fn list_groups(&self) -> Result<Vec<GroupRecord>> {
        let rows = sqlx::query_as::<_, GroupRecord>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list groups: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Update the known member count after enumeration
    pub async fn update_member_count(&self, id: GroupId, member_count: i64) -> Result<()> {
        sqlx::query("UPDATE groups SET member_count = ? WHERE id = ?")
            .bind(member_count)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update group member count: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Mark a group complete
    ///
    /// Conditional on the flag still being clear, so two members finishing
    /// at the same instant flip the group exactly once. Returns whether
    /// this call did the flip.
    pub async fn mark_group_complete(&self, id: GroupId) -> Result<bool> {
        let result = sqlx::query("UPDATE groups SET is_complete = 1 WHERE id = ? AND is_complete = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark group complete: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a group (cascades to its member tasks and their segments)
    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete group: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
