//! Task record CRUD, lookups, and listing filters.

use crate::error::DatabaseError;
use crate::types::TaskId;
use crate::{Error, Result};

use super::{Database, NewTask, TaskFilter, TaskRecord};

const TASK_COLUMNS: &str = r#"
    id, source_key, url, file_path, protocol, options, status, priority,
    total_bytes, completed_bytes, resumable, is_complete, is_group_child,
    group_id, error_message, created_at, completed_at
"#;

impl Database {
    /// Insert a new task record
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                source_key, url, file_path, protocol, options, status,
                priority, is_group_child, group_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.source_key)
        .bind(&task.url)
        .bind(&task.file_path)
        .bind(task.protocol)
        .bind(&task.options)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.is_group_child)
        .bind(task.group_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        Ok(TaskId(result.last_insert_rowid()))
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Find a task by its deterministic identity key
    pub async fn find_by_source_key(&self, source_key: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE source_key = ?"
        ))
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find task by source key: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Find standalone tasks matching a source URL
    ///
    /// Group members are excluded; the same URL inside a group has a
    /// group-scoped identity key.
    pub async fn find_by_url(&self, url: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE url = ? AND is_group_child = 0 ORDER BY created_at ASC"
        ))
        .bind(url)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find tasks by url: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Whether any standalone task references this URL
    pub async fn task_exists(&self, url: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE url = ? AND is_group_child = 0",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check task existence: {}",
                e
            )))
        })?;

        Ok(count > 0)
    }

    /// Paginated listing of standalone tasks with a nonempty destination
    ///
    /// `page` is 1-based; parameter validation happens at the control
    /// surface before this query runs.
    pub async fn list_tasks(
        &self,
        filter: TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<TaskRecord>> {
        let predicate = match filter {
            TaskFilter::All => "",
            TaskFilter::Complete => "AND is_complete = 1",
            TaskFilter::Incomplete => "AND is_complete = 0",
        };

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;

        let rows = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE is_group_child = 0 AND file_path != '' {predicate}
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Get all incomplete tasks, group members included (for resume-all and
    /// startup restoration)
    pub async fn get_incomplete_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE is_complete = 0
            ORDER BY priority DESC, created_at ASC, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get incomplete tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List all tasks (group members included)
    pub async fn get_all_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get all tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List tasks with a specific status
    pub async fn list_by_status(&self, status: i32) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE status = ?
            ORDER BY priority DESC, created_at ASC, id ASC
            "#
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks by status: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Update task status
    pub async fn update_status(&self, id: TaskId, status: i32) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record discovery results: total size and resumability
    pub async fn update_metadata(
        &self,
        id: TaskId,
        total_bytes: Option<u64>,
        resumable: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE tasks SET total_bytes = ?, resumable = ? WHERE id = ?")
            .bind(total_bytes.map(|b| b as i64).unwrap_or(-1))
            .bind(resumable)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update metadata: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Update completed byte count
    pub async fn update_progress(&self, id: TaskId, completed_bytes: u64) -> Result<()> {
        sqlx::query("UPDATE tasks SET completed_bytes = ? WHERE id = ?")
            .bind(completed_bytes as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update progress: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Mark a task complete: completion flag, final byte count, timestamp
    pub async fn mark_complete(&self, id: TaskId, status: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, is_complete = 1, error_message = NULL,
                completed_bytes = MAX(completed_bytes, total_bytes), completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark task complete: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Set task error message
    pub async fn set_error(&self, id: TaskId, error: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET error_message = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a task (cascades to its segment checkpoints)
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete task: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// List the member tasks of a group
    pub async fn group_children(&self, group_id: i64) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE group_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list group members: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Count a group's incomplete members
    pub async fn incomplete_children(&self, group_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE group_id = ? AND is_complete = 0")
                .bind(group_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count incomplete group members: {}",
                        e
                    )))
                })?;

        Ok(count)
    }
}
