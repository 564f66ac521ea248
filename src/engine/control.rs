//! Command handlers — task lifecycle control, single and bulk.
//!
//! These run only on the dispatch loop, one command at a time, which is
//! what keeps bulk operations consistent with racing individual commands:
//! whatever order the channel delivered is the order applied here.

use crate::error::Result;
use crate::loader::Loader;
use crate::options::SourceSpec;
use crate::types::{Event, GroupId, Status, TaskId};
use std::collections::HashSet;
use std::sync::Arc;

use super::MultiDownloader;

impl MultiDownloader {
    /// Start (or resume) a single task: build its loader and kick off the
    /// metadata-discovery phase.
    ///
    /// A task that already has a live loader is left alone — the registry
    /// guarantees at most one active execution per identity.
    pub(crate) async fn handle_start(&self, id: TaskId) -> Result<()> {
        let Some(record) = self.db.get_task(id).await? else {
            tracing::warn!(task_id = id.0, "start requested for unknown task");
            return Ok(());
        };
        if record.is_complete {
            tracing::debug!(task_id = id.0, "task already complete, nothing to start");
            return Ok(());
        }

        {
            let loaders = self.loaders.lock().await;
            if loaders.contains_key(&id) {
                tracing::debug!(task_id = id.0, "task already live");
                return Ok(());
            }
        }

        let source: SourceSpec = match serde_json::from_str(&record.options) {
            Ok(source) => source,
            Err(e) => {
                self.fail_task_permanent(id, &format!("stored options unreadable: {e}"))
                    .await;
                return Ok(());
            }
        };
        let adapter = match self.adapter_factory.build(&record.url, &source, &self.config) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.fail_task_permanent(id, &format!("adapter construction failed: {e}"))
                    .await;
                return Ok(());
            }
        };

        let loader = Arc::new(Loader::new(id, adapter));
        self.loaders.lock().await.insert(id, Arc::clone(&loader));

        let engine = self.clone();
        tokio::spawn(async move {
            crate::loader::run_discovery(engine, loader).await;
        });

        Ok(())
    }

    /// Stop a single task, keeping its record and checkpoint.
    ///
    /// Idempotent. For a task that is actively transferring, the transfer's
    /// finalizer owns the Stopped transition (after flushing the
    /// checkpoint); for anything else the transition happens here.
    pub(crate) async fn handle_stop(&self, id: TaskId) -> Result<()> {
        let was_active = self.queue_state.active.lock().await.contains_key(&id);

        // Registry removal first: discovery commits admission under the
        // registry lock, so from here nothing re-queues this identity
        let loader = self.loaders.lock().await.remove(&id);
        if let Some(loader) = &loader {
            loader.cancel.cancel();
        }

        self.remove_from_queue(id).await;

        if !was_active
            && let Some(record) = self.db.get_task(id).await?
            && !record.is_complete
            && Status::from_i32(record.status) != Status::Stopped
        {
            self.db.update_status(id, Status::Stopped.to_i32()).await?;
            self.emit_event(Event::Stopped { id });
        }

        Ok(())
    }

    /// Cancel a single task: stop it, optionally delete its file, remove
    /// its record.
    pub(crate) async fn handle_cancel(&self, id: TaskId, remove_file: bool) -> Result<()> {
        if let Some(loader) = self.loaders.lock().await.remove(&id) {
            loader.cancel.cancel();
        }
        self.remove_from_queue(id).await;

        let Some(record) = self.db.get_task(id).await? else {
            return Ok(());
        };

        if remove_file && !record.file_path.is_empty() {
            remove_file_best_effort(id, &record.file_path).await;
        }

        self.db.delete_task(id).await?;
        self.emit_event(Event::Removed { id });

        Ok(())
    }

    /// Stop every running loader and clear the waiting queue.
    ///
    /// Records and checkpoints survive; only the pending admissions go.
    pub(crate) async fn handle_stop_all(&self) -> Result<()> {
        // Drain the registry before clearing the queue: a discovery racing
        // this command commits its admission under the registry lock, so
        // once the drain completes nothing re-queues behind the clear
        let drained: Vec<(TaskId, Arc<Loader>)> =
            self.loaders.lock().await.drain().collect();
        for (_, loader) in &drained {
            loader.cancel.cancel();
        }

        {
            let mut queue = self.queue_state.queue.lock().await;
            queue.clear();
        }

        let active_ids: HashSet<TaskId> = self
            .queue_state
            .active
            .lock()
            .await
            .keys()
            .copied()
            .collect();

        let mut stopped_count = 0;
        for (id, _) in &drained {
            // Active transfers flush their checkpoint and report Stopped
            // from their own finalizer
            if active_ids.contains(id) {
                stopped_count += 1;
                continue;
            }
            match self.db.get_task(*id).await {
                Ok(Some(record)) if !record.is_complete => {
                    if let Err(e) = self.db.update_status(*id, Status::Stopped.to_i32()).await {
                        tracing::warn!(task_id = id.0, error = %e, "failed to mark task stopped");
                        continue;
                    }
                    self.emit_event(Event::Stopped { id: *id });
                    stopped_count += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(task_id = id.0, error = %e, "failed to load task during stop_all");
                }
            }
        }

        tracing::info!(stopped_count, "stopped all live tasks");
        self.emit_event(Event::QueueStopped);

        Ok(())
    }

    /// Re-apply normal admission to every incomplete persisted task.
    ///
    /// Tasks flow through discovery and the waiting queue exactly as if
    /// started individually; the concurrency limit decides who runs now and
    /// who waits.
    pub(crate) async fn handle_resume_all(&self) -> Result<()> {
        let incomplete = self.db.get_incomplete_tasks().await?;

        let mut resumed_count = 0;
        for record in incomplete {
            let id = TaskId(record.id);
            if let Err(e) = self.handle_start(id).await {
                tracing::warn!(task_id = record.id, error = %e, "failed to resume task during resume_all");
            } else {
                resumed_count += 1;
            }
        }

        tracing::info!(resumed_count, "resumed all incomplete tasks");
        self.emit_event(Event::QueueResumed);

        Ok(())
    }

    /// Cancel every task and group, removing all records.
    ///
    /// `remove_file` governs files for completed and partial tasks alike:
    /// set, both are deleted; unset, both stay on disk.
    pub(crate) async fn handle_cancel_all(&self, remove_file: bool) -> Result<()> {
        let drained: Vec<(TaskId, Arc<Loader>)> =
            self.loaders.lock().await.drain().collect();
        for (_, loader) in &drained {
            loader.cancel.cancel();
        }

        {
            let mut queue = self.queue_state.queue.lock().await;
            queue.clear();
        }

        let tasks = self.db.get_all_tasks().await?;
        let mut removed_count = 0;
        for record in tasks {
            let id = TaskId(record.id);

            if remove_file && !record.file_path.is_empty() {
                remove_file_best_effort(id, &record.file_path).await;
            }

            if let Err(e) = self.db.delete_task(id).await {
                tracing::warn!(task_id = record.id, error = %e, "failed to delete task during cancel_all");
                continue;
            }
            self.emit_event(Event::Removed { id });
            removed_count += 1;
        }

        for group in self.db.list_groups().await? {
            if let Err(e) = self.db.delete_group(GroupId(group.id)).await {
                tracing::warn!(group_id = group.id, error = %e, "failed to delete group during cancel_all");
            }
        }

        tracing::info!(removed_count, remove_file, "cancelled all tasks");

        Ok(())
    }

    /// Start a group: materialize members if the source needs enumeration,
    /// then schedule every incomplete member individually.
    pub(crate) async fn handle_start_group(&self, id: GroupId) -> Result<()> {
        let Some(group) = self.db.get_group(id).await? else {
            tracing::warn!(group_id = id.0, "start requested for unknown group");
            return Ok(());
        };
        if group.is_complete {
            tracing::debug!(group_id = id.0, "group already complete, nothing to start");
            return Ok(());
        }

        crate::loader::ensure_group_members(self, &group).await?;

        let children = self.db.group_children(group.id).await?;
        for child in children {
            if child.is_complete {
                continue;
            }
            if let Err(e) = self.handle_start(TaskId(child.id)).await {
                tracing::warn!(
                    group_id = id.0,
                    task_id = child.id,
                    error = %e,
                    "failed to start group member"
                );
            }
        }

        Ok(())
    }

    /// Stop every member of a group.
    pub(crate) async fn handle_stop_group(&self, id: GroupId) -> Result<()> {
        let Some(group) = self.db.get_group(id).await? else {
            return Ok(());
        };

        for child in self.db.group_children(group.id).await? {
            if let Err(e) = self.handle_stop(TaskId(child.id)).await {
                tracing::warn!(
                    group_id = id.0,
                    task_id = child.id,
                    error = %e,
                    "failed to stop group member"
                );
            }
        }

        Ok(())
    }

    /// Cancel a group: cancel every member, then drop the group record.
    pub(crate) async fn handle_cancel_group(&self, id: GroupId, remove_file: bool) -> Result<()> {
        let Some(group) = self.db.get_group(id).await? else {
            return Ok(());
        };

        for child in self.db.group_children(group.id).await? {
            if let Err(e) = self.handle_cancel(TaskId(child.id), remove_file).await {
                tracing::warn!(
                    group_id = id.0,
                    task_id = child.id,
                    error = %e,
                    "failed to cancel group member"
                );
            }
        }

        self.db.delete_group(id).await?;

        Ok(())
    }

    /// Mark a task failed with no retry; used for pre-transfer failures
    /// like unreadable stored options.
    pub(crate) async fn fail_task_permanent(&self, id: TaskId, error: &str) {
        tracing::error!(task_id = id.0, error, "task failed permanently");
        if let Err(e) = self.db.update_status(id, Status::Failed.to_i32()).await {
            tracing::error!(task_id = id.0, error = %e, "failed to update status to failed");
        }
        if let Err(e) = self.db.set_error(id, error).await {
            tracing::error!(task_id = id.0, error = %e, "failed to record error message");
        }
        self.emit_event(Event::Failed {
            id,
            error: error.to_string(),
            retry_scheduled: false,
            attempt: 0,
        });
    }
}

/// Delete a file, tolerating its absence.
async fn remove_file_best_effort(id: TaskId, path: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(task_id = id.0, path, "removed file");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(task_id = id.0, path, error = %e, "failed to remove file");
        }
    }
}
