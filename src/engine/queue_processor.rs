//! Admission loop — grants concurrency slots to the waiting queue.

use std::time::Duration;

use crate::loader::TransferTaskContext;

use super::MultiDownloader;

/// Interval between queue polling attempts when the queue is empty
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl MultiDownloader {
    /// Start the admission loop
    ///
    /// The loop continuously:
    /// 1. Acquires a permit from the concurrency limiter (blocks while
    ///    `max_concurrent_tasks` transfers are running)
    /// 2. Pops the highest-priority waiting task once a slot is free
    /// 3. Spawns the transfer phase for that task's live loader
    ///
    /// Permit-before-pop keeps a task in the waiting queue until the
    /// instant it is admitted, so queue occupancy and the running count
    /// always add up. A task whose loader disappeared between queueing and
    /// admission (a stop raced the pop) is skipped and its slot reused for
    /// the next waiter.
    pub(crate) fn start_queue_processor(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            'admission: loop {
                if self.shutdown_token.is_cancelled() {
                    break;
                }

                let permit = match self
                    .queue_state
                    .concurrent_limit
                    .clone()
                    .acquire_owned()
                    .await
                {
                    Ok(permit) => permit,
                    // Semaphore closed: shutdown
                    Err(_) => break,
                };

                // Slot in hand; wait for something to admit
                let item = loop {
                    let popped = {
                        let mut queue = self.queue_state.queue.lock().await;
                        queue.pop()
                    };
                    if let Some(item) = popped {
                        break item;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => {}
                        _ = self.shutdown_token.cancelled() => break 'admission,
                    }
                };

                let id = item.id;

                // A stop that raced the pop removed the loader; skip
                let loader = {
                    let loaders = self.loaders.lock().await;
                    loaders.get(&id).cloned()
                };
                let Some(loader) = loader else {
                    tracing::debug!(task_id = id.0, "skipping admission, loader no longer live");
                    continue;
                };
                if loader.cancel.is_cancelled() {
                    continue;
                }

                {
                    let mut active = self.queue_state.active.lock().await;
                    active.insert(id, loader.cancel.clone());
                }

                let ctx = TransferTaskContext {
                    id,
                    loader,
                    engine: self.clone(),
                };

                tokio::spawn(async move {
                    let _permit = permit;
                    crate::loader::run_transfer_task(ctx).await;
                });
            }
        })
    }
}
