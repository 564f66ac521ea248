//! Coalesced progress reporting and the stall watchdog.
//!
//! Range fetchers only bump atomic counters; this reporter turns them into
//! bounded-rate database flushes and Progress events. Counters never
//! decrease, so per-task progress events are monotonically non-decreasing.

use crate::db::Database;
use crate::error::Result;
use crate::types::{Event, TaskId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::checkpoint::Checkpoint;

/// Poll interval for the stall watchdog
const WATCHDOG_POLL: Duration = Duration::from_secs(1);

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Task ID
    pub id: TaskId,
    /// Total size, when known
    pub total: Option<u64>,
    /// Shared checkpoint counters
    pub checkpoint: Arc<Checkpoint>,
    /// Database handle
    pub db: Arc<Database>,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Interval between emissions
    pub interval: Duration,
    /// Cancellation token
    pub cancel: CancellationToken,
}

/// Spawn a background task that periodically flushes the checkpoint and
/// emits a coalesced Progress event.
pub(crate) fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        id,
        total,
        checkpoint,
        db,
        event_tx,
        interval,
        cancel,
    } = params;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so speed has a window
        ticker.tick().await;

        let started = tokio::time::Instant::now();
        let baseline = checkpoint.total_done();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let completed = checkpoint.total_done();

                    if let Err(e) = flush_checkpoint(&db, id, &checkpoint).await {
                        tracing::error!(task_id = id.0, error = %e, "failed to flush progress");
                    }

                    let elapsed = started.elapsed().as_secs_f64();
                    let speed_bps = if elapsed > 0.0 {
                        ((completed.saturating_sub(baseline)) as f64 / elapsed) as u64
                    } else {
                        0
                    };
                    let percent = total
                        .filter(|t| *t > 0)
                        .map(|t| (completed as f32 / t as f32) * 100.0);

                    event_tx
                        .send(Event::Progress {
                            id,
                            completed_bytes: completed,
                            total_bytes: total,
                            percent,
                            speed_bps,
                        })
                        .ok();
                }
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }
    })
}

/// Flush the checkpoint to the store: the task's byte count plus every
/// persisted segment row.
pub(crate) async fn flush_checkpoint(
    db: &Database,
    id: TaskId,
    checkpoint: &Checkpoint,
) -> Result<()> {
    db.update_progress(id, checkpoint.total_done()).await?;

    if !checkpoint.whole {
        for record in checkpoint.records(id) {
            db.update_segment_progress(id, record.seg_index, record.downloaded as u64)
                .await?;
        }
    }

    Ok(())
}

/// Persist a fresh transfer plan's rows (or clear them for an unresumable
/// plan) so the checkpoint on disk matches the plan in memory.
pub(crate) async fn persist_plan(db: &Database, id: TaskId, checkpoint: &Checkpoint) -> Result<()> {
    if checkpoint.whole {
        db.clear_segments(id).await
    } else {
        db.replace_segments(id, &checkpoint.records(id)).await
    }
}

/// Resolve when the transfer has made no progress for `timeout`; returns
/// the observed idle interval.
pub(crate) async fn stall_watchdog(checkpoint: Arc<Checkpoint>, timeout: Duration) -> Duration {
    let mut last = checkpoint.total_done();
    let mut idle = Duration::ZERO;

    loop {
        tokio::time::sleep(WATCHDOG_POLL).await;
        let current = checkpoint.total_done();
        if current != last {
            last = current;
            idle = Duration::ZERO;
        } else {
            idle += WATCHDOG_POLL;
            if idle >= timeout {
                return idle;
            }
        }
    }
}
