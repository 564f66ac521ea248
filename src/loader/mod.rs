//! Loader — the runtime driver of one task through discovery and transfer.
//!
//! A loader exists only while its task is queued or executing; the engine's
//! registry holds at most one per identity and drops it once the task is
//! terminal. The state machine it drives:
//!
//! ```text
//! Waiting -> Discovering -> Waiting -> Transferring -> Complete
//!                                  \-> Stopped          |  \-> Stopped
//!                                                       \--> Failed -> Waiting (retry)
//! ```
//!
//! Submodules:
//! - [`checkpoint`] - Segment planning and shared progress counters
//! - [`discovery`] - Metadata-probe phase
//! - [`progress`] - Coalesced progress reporting and the stall watchdog
//! - [`group`] - Member enumeration for composite tasks

pub(crate) mod checkpoint;
mod discovery;
mod group;
mod progress;

pub(crate) use discovery::run_discovery;
pub(crate) use group::ensure_group_members;
pub(crate) use progress::{flush_checkpoint, persist_plan, spawn_progress_reporter, stall_watchdog};

use crate::adapter::{ProtocolAdapter, TransferCtx};
use crate::engine::MultiDownloader;
use crate::error::Error;
use crate::retry::{IsRetryable, backoff_delay};
use crate::types::{Event, Status, TaskId};
use checkpoint::Checkpoint;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;

/// Runtime state of one live task.
pub(crate) struct Loader {
    pub(crate) id: TaskId,
    pub(crate) adapter: Arc<dyn ProtocolAdapter>,
    /// Cancelled by stop/cancel commands; observed by every phase.
    pub(crate) cancel: CancellationToken,
    /// Transfer attempts so far; owned here, not ambient configuration.
    pub(crate) retry_attempts: AtomicU32,
}

impl Loader {
    pub(crate) fn new(id: TaskId, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        Self {
            id,
            adapter,
            cancel: CancellationToken::new(),
            retry_attempts: AtomicU32::new(0),
        }
    }
}

/// Context handed to the transfer phase by the admission loop.
pub(crate) struct TransferTaskContext {
    pub(crate) id: TaskId,
    pub(crate) loader: Arc<Loader>,
    pub(crate) engine: MultiDownloader,
}

impl TransferTaskContext {
    /// Remove this task from the active-transfer map.
    async fn remove_from_active(&self) {
        let mut active = self.engine.queue_state.active.lock().await;
        active.remove(&self.id);
    }

    /// Drop the live loader, making the identity schedulable again.
    async fn remove_loader(&self) {
        let mut loaders = self.engine.loaders.lock().await;
        loaders.remove(&self.id);
    }
}

/// Transfer phase — runs while holding a concurrency permit.
///
/// Plans the checkpoint from persisted state, runs the adapter transfer
/// under the stall watchdog, then finalizes: complete, stopped with a
/// flushed checkpoint, failed with a scheduled retry, or failed terminally.
pub(crate) async fn run_transfer_task(ctx: TransferTaskContext) {
    let id = ctx.id;
    let engine = &ctx.engine;

    let record = match engine.db.get_task(id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(task_id = id.0, "task record vanished before transfer");
            ctx.remove_from_active().await;
            ctx.remove_loader().await;
            return;
        }
        Err(e) => {
            tracing::error!(task_id = id.0, error = %e, "failed to load task record");
            ctx.remove_from_active().await;
            ctx.remove_loader().await;
            return;
        }
    };

    // Cancelled between admission and execution: settle the status here,
    // since no transfer will run to finalize it
    if ctx.loader.cancel.is_cancelled() {
        if !record.is_complete {
            if let Err(e) = engine.db.update_status(id, Status::Stopped.to_i32()).await {
                tracing::error!(task_id = id.0, error = %e, "failed to mark task stopped");
            }
            engine.emit_event(Event::Stopped { id });
        }
        ctx.remove_from_active().await;
        return;
    }

    // Rebuild the plan from whatever checkpoint was flushed last
    let existing = engine.db.get_segments(id).await.unwrap_or_default();
    let total = (record.total_bytes >= 0).then_some(record.total_bytes as u64);
    let checkpoint = Arc::new(Checkpoint::plan(
        total,
        record.resumable,
        engine.config.download.segments_per_task,
        engine.config.download.segment_min_bytes,
        &existing,
    ));

    if let Err(e) = persist_plan(&engine.db, id, &checkpoint).await {
        tracing::warn!(task_id = id.0, error = %e, "failed to persist transfer plan");
    }

    if let Err(e) = engine.db.update_status(id, Status::Transferring.to_i32()).await {
        tracing::error!(task_id = id.0, error = %e, "failed to update status to transferring");
    }
    engine.emit_event(Event::Transferring { id });
    tracing::info!(
        task_id = id.0,
        url = %record.url,
        ?total,
        resumable = record.resumable,
        spans = checkpoint.spans.len(),
        resume_from = checkpoint.total_done(),
        "transfer starting"
    );

    let reporter_cancel = CancellationToken::new();
    let reporter = spawn_progress_reporter(progress::ProgressReporterParams {
        id,
        total,
        checkpoint: Arc::clone(&checkpoint),
        db: Arc::clone(&engine.db),
        event_tx: engine.event_tx.clone(),
        interval: engine.config.download.progress_interval,
        cancel: reporter_cancel.clone(),
    });

    let transfer_ctx = TransferCtx {
        id,
        file_path: PathBuf::from(&record.file_path),
        cancel: ctx.loader.cancel.clone(),
        checkpoint: Arc::clone(&checkpoint),
    };

    let stall_timeout = engine.config.download.stall_timeout;
    let result = tokio::select! {
        result = ctx.loader.adapter.transfer(&transfer_ctx) => result,
        idle = stall_watchdog(Arc::clone(&checkpoint), stall_timeout) => {
            Err(Error::Stalled { idle })
        }
        _ = ctx.loader.cancel.cancelled() => Err(Error::Cancelled),
    };

    reporter_cancel.cancel();
    reporter.abort();

    // The checkpoint is flushed on every exit path, success included, so a
    // process death right after this point still resumes correctly
    if let Err(e) = flush_checkpoint(&engine.db, id, &checkpoint).await {
        tracing::warn!(task_id = id.0, error = %e, "failed to flush checkpoint");
    }

    finalize_transfer(&ctx, &checkpoint, result).await;
    ctx.remove_from_active().await;
}

/// Resolve the transfer outcome into a terminal state or a scheduled retry.
async fn finalize_transfer(
    ctx: &TransferTaskContext,
    checkpoint: &Checkpoint,
    result: Result<(), Error>,
) {
    let id = ctx.id;
    let engine = &ctx.engine;

    // A clean adapter return with bounded spans left short means the server
    // ended the stream early; treat it as a transfer failure. Open-ended
    // spans have no expected length to hold the adapter to.
    let result = match result {
        Ok(())
            if checkpoint.total.is_some()
                && !checkpoint.whole
                && !checkpoint.all_spans_done() =>
        {
            Err(Error::Transfer(format!(
                "transfer ended with {} bytes missing",
                missing_bytes(checkpoint)
            )))
        }
        other => other,
    };

    match result {
        Ok(()) => {
            let completed = checkpoint.total_done();
            let record = engine.db.get_task(id).await.ok().flatten();

            if let Err(e) = engine.db.update_progress(id, completed).await {
                tracing::error!(task_id = id.0, error = %e, "failed to record final byte count");
            }
            // A stream of unknown length just told us its size
            if checkpoint.total.is_none() {
                let resumable = record.as_ref().is_some_and(|r| r.resumable);
                if let Err(e) = engine.db.update_metadata(id, Some(completed), resumable).await {
                    tracing::error!(task_id = id.0, error = %e, "failed to record discovered size");
                }
            }
            if let Err(e) = engine.db.mark_complete(id, Status::Complete.to_i32()).await {
                tracing::error!(task_id = id.0, error = %e, "failed to mark task complete");
            }
            // Checkpoints have nothing left to restart
            engine.db.clear_segments(id).await.ok();

            let path = record
                .map(|r| PathBuf::from(r.file_path))
                .unwrap_or_default();

            tracing::info!(task_id = id.0, completed_bytes = completed, "transfer complete");
            engine.emit_event(Event::Complete { id, path });

            ctx.remove_loader().await;
            group::check_group_completion(engine, id).await;
        }
        Err(Error::Cancelled) => {
            // Record may already be gone if a cancel command removed it
            match engine.db.get_task(id).await {
                Ok(Some(record)) if !record.is_complete => {
                    if let Err(e) = engine.db.update_status(id, Status::Stopped.to_i32()).await {
                        tracing::error!(task_id = id.0, error = %e, "failed to mark task stopped");
                    }
                    tracing::info!(
                        task_id = id.0,
                        checkpoint_bytes = checkpoint.total_done(),
                        "transfer stopped"
                    );
                    engine.emit_event(Event::Stopped { id });
                }
                _ => {}
            }
            ctx.remove_loader().await;
        }
        Err(e) => {
            let attempt = ctx.loader.retry_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let max_attempts = engine.config.retry.max_attempts;
            let retry_scheduled = e.is_retryable() && attempt <= max_attempts;

            if let Err(db_err) = engine.db.set_error(id, &e.to_string()).await {
                tracing::error!(task_id = id.0, error = %db_err, "failed to record error message");
            }

            if retry_scheduled {
                tracing::warn!(
                    task_id = id.0,
                    error = %e,
                    attempt,
                    max_attempts,
                    "transfer failed, retry scheduled"
                );
                if let Err(db_err) = engine.db.update_status(id, Status::Waiting.to_i32()).await {
                    tracing::error!(task_id = id.0, error = %db_err, "failed to update status to waiting");
                }
                engine.emit_event(Event::Failed {
                    id,
                    error: e.to_string(),
                    retry_scheduled: true,
                    attempt,
                });

                // Delayed re-entry to the waiting queue; the loader stays
                // live so the identity cannot start twice meanwhile
                let engine = engine.clone();
                let loader = Arc::clone(&ctx.loader);
                let delay = backoff_delay(&engine.config.retry, attempt);
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = loader.cancel.cancelled() => return,
                    }
                    if let Err(e) = engine.add_to_queue(id).await {
                        tracing::error!(task_id = id.0, error = %e, "failed to requeue for retry");
                        return;
                    }
                    engine.emit_event(Event::Waiting { id });
                });
            } else {
                tracing::error!(
                    task_id = id.0,
                    error = %e,
                    attempt,
                    "transfer failed terminally"
                );
                if let Err(db_err) = engine.db.update_status(id, Status::Failed.to_i32()).await {
                    tracing::error!(task_id = id.0, error = %db_err, "failed to update status to failed");
                }
                engine.emit_event(Event::Failed {
                    id,
                    error: e.to_string(),
                    retry_scheduled: false,
                    attempt,
                });
                ctx.remove_loader().await;
            }
        }
    }
}

fn missing_bytes(checkpoint: &Checkpoint) -> u64 {
    checkpoint
        .total
        .map(|t| t.saturating_sub(checkpoint.total_done()))
        .unwrap_or(0)
}
