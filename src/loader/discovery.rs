//! Metadata-discovery phase.
//!
//! Discovery runs on its own spawned task, never on the transfer pool, so
//! probing many queued tasks cannot starve active transfers. Transient
//! probe failures retry inline with backoff; success records size and
//! resumability and requests admission from the scheduler.

use crate::engine::MultiDownloader;
use crate::error::Error;
use crate::retry;
use crate::types::{Event, Status};
use std::sync::Arc;

use super::Loader;

pub(crate) async fn run_discovery(engine: MultiDownloader, loader: Arc<Loader>) {
    let id = loader.id;

    if let Err(e) = engine.db.update_status(id, Status::Discovering.to_i32()).await {
        tracing::error!(task_id = id.0, error = %e, "failed to update status to discovering");
    }
    engine.emit_event(Event::Discovering { id });

    let adapter = Arc::clone(&loader.adapter);
    let result = tokio::select! {
        result = retry::with_backoff(&engine.config.retry, || adapter.fetch_metadata()) => result,
        _ = loader.cancel.cancelled() => Err(Error::Cancelled),
    };

    match result {
        Ok(metadata) => {
            tracing::info!(
                task_id = id.0,
                size = ?metadata.size,
                resumable = metadata.resumable,
                "discovery complete"
            );

            // Commit under the registry lock: a stop that raced the probe
            // has already removed the loader, and must not find this task
            // re-queued behind its back
            let loaders = engine.loaders.lock().await;
            if !loaders.contains_key(&id) || loader.cancel.is_cancelled() {
                tracing::debug!(task_id = id.0, "discovery finished after stop, discarding");
                return;
            }

            if let Err(e) = engine
                .db
                .update_metadata(id, metadata.size, metadata.resumable)
                .await
            {
                tracing::error!(task_id = id.0, error = %e, "failed to record metadata");
                drop(loaders);
                engine.fail_task_permanent(id, "failed to record discovery result").await;
                engine.loaders.lock().await.remove(&id);
                return;
            }

            if let Err(e) = engine.db.update_status(id, Status::Waiting.to_i32()).await {
                tracing::error!(task_id = id.0, error = %e, "failed to update status to waiting");
            }

            if let Err(e) = engine.add_to_queue(id).await {
                tracing::error!(task_id = id.0, error = %e, "failed to request admission");
                drop(loaders);
                engine.loaders.lock().await.remove(&id);
                return;
            }
            drop(loaders);
            engine.emit_event(Event::Waiting { id });
        }
        Err(Error::Cancelled) => {
            // The stop handler owns the Stopped transition for
            // non-transferring tasks; nothing to report here
            tracing::debug!(task_id = id.0, "discovery cancelled");
        }
        Err(e) => {
            // Retry budget exhausted or failure marked permanent; terminal
            tracing::error!(task_id = id.0, error = %e, "discovery failed");
            if let Err(db_err) = engine.db.update_status(id, Status::Failed.to_i32()).await {
                tracing::error!(task_id = id.0, error = %db_err, "failed to update status to failed");
            }
            if let Err(db_err) = engine.db.set_error(id, &e.to_string()).await {
                tracing::error!(task_id = id.0, error = %db_err, "failed to record error message");
            }
            engine.emit_event(Event::Failed {
                id,
                error: e.to_string(),
                retry_scheduled: false,
                attempt: engine.config.retry.max_attempts,
            });
            engine.loaders.lock().await.remove(&id);
        }
    }
}
