//! Per-segment checkpoints for resume support.
//!
//! Each resumable task owns a set of segment rows recording how many bytes
//! of each byte range are already on disk. The owning loader flushes them on
//! progress ticks and before reporting a stop or failure; a later run plans
//! its transfer from whatever was flushed last.

use crate::error::DatabaseError;
use crate::types::TaskId;
use crate::{Error, Result};

use super::{Database, SegmentRecord};

impl Database {
    /// Replace a task's segment checkpoints with a fresh plan
    pub async fn replace_segments(&self, id: TaskId, segments: &[SegmentRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin segment transaction: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM segments WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear segments: {}",
                    e
                )))
            })?;

        for segment in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (task_id, seg_index, start_byte, end_byte, downloaded)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(segment.seg_index)
            .bind(segment.start_byte)
            .bind(segment.end_byte)
            .bind(segment.downloaded)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert segment: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit segment transaction: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a task's segment checkpoints, ordered by index
    pub async fn get_segments(&self, id: TaskId) -> Result<Vec<SegmentRecord>> {
        let rows = sqlx::query_as::<_, SegmentRecord>(
            r#"
            SELECT task_id, seg_index, start_byte, end_byte, downloaded
            FROM segments
            WHERE task_id = ?
            ORDER BY seg_index ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get segments: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Flush one segment's downloaded byte count
    pub async fn update_segment_progress(
        &self,
        id: TaskId,
        seg_index: i64,
        downloaded: u64,
    ) -> Result<()> {
        sqlx::query("UPDATE segments SET downloaded = ? WHERE task_id = ? AND seg_index = ?")
            .bind(downloaded as i64)
            .bind(id)
            .bind(seg_index)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update segment progress: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Drop a task's segment checkpoints (restart-from-zero path)
    pub async fn clear_segments(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM segments WHERE task_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear segments: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
