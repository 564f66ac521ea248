//! Waiting-queue management and startup restoration.

use crate::error::{DatabaseError, Error, Result};
use crate::types::{Priority, Status, TaskId};

use super::{MultiDownloader, QueuedTask};

impl MultiDownloader {
    /// Add a task to the in-memory waiting queue
    ///
    /// Ordering is priority first, then FIFO by creation time. Called after
    /// a successful discovery phase and when a retry re-enters the queue.
    pub(crate) async fn add_to_queue(&self, id: TaskId) -> Result<()> {
        let record = self.db.get_task(id).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("Task {} not found", id)))
        })?;

        let queued = QueuedTask {
            id,
            priority: Priority::from_i32(record.priority),
            created_at: record.created_at,
        };

        let mut queue = self.queue_state.queue.lock().await;
        queue.push(queued);

        Ok(())
    }

    /// Remove a task from the waiting queue without starting it
    ///
    /// Returns true if the task was queued.
    pub(crate) async fn remove_from_queue(&self, id: TaskId) -> bool {
        let mut queue = self.queue_state.queue.lock().await;

        let original_len = queue.len();
        let items: Vec<_> = queue.drain().filter(|item| item.id != id).collect();
        let was_removed = items.len() < original_len;
        *queue = items.into_iter().collect();

        was_removed
    }

    /// Normalize task state left over from a previous session
    ///
    /// Tasks that were mid-discovery or mid-transfer when the process died
    /// are put back to Waiting with their checkpoints intact. Nothing
    /// restarts on its own; a resume command re-applies admission.
    pub(crate) async fn restore_interrupted(&self) -> Result<()> {
        let incomplete = self.db.get_incomplete_tasks().await?;

        let mut restored_count = 0;
        for record in incomplete {
            let status = Status::from_i32(record.status);
            if matches!(status, Status::Discovering | Status::Transferring) {
                self.db
                    .update_status(TaskId(record.id), Status::Waiting.to_i32())
                    .await?;
                restored_count += 1;
            }
        }

        if restored_count > 0 {
            tracing::info!(
                restored_count,
                "restored interrupted tasks from previous session"
            );
        }

        Ok(())
    }
}
