//! Core engine implementation split into focused submodules.
//!
//! The `MultiDownloader` struct and its methods are organized by domain:
//! - [`command`] - Command values, the ordered dispatch channel, and the
//!   public control surface
//! - [`control`] - Command handlers (start/stop/resume/cancel, single and bulk)
//! - [`tasks`] - Task/group registration and record lookups
//! - [`queue`] - Waiting-queue management and startup restoration
//! - [`queue_processor`] - Admission under the concurrency limit
//! - [`lifecycle`] - Graceful shutdown coordination

mod command;
mod control;
mod lifecycle;
mod queue;
mod queue_processor;
mod tasks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::types::{Event, Priority, QueueStats, TaskId};

pub(crate) use command::Command;

/// Queue and admission state
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Waiting queue, ordered by priority then FIFO creation time
    pub(crate) queue:
        std::sync::Arc<tokio::sync::Mutex<std::collections::BinaryHeap<QueuedTask>>>,
    /// Semaphore enforcing max_concurrent_tasks
    pub(crate) concurrent_limit: std::sync::Arc<tokio::sync::Semaphore>,
    /// Map of actively transferring tasks to their cancellation tokens
    pub(crate) active: std::sync::Arc<
        tokio::sync::Mutex<
            std::collections::HashMap<TaskId, tokio_util::sync::CancellationToken>,
        >,
    >,
    /// Flag indicating whether new tasks are accepted (false during shutdown)
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

/// Main engine instance (cloneable - all fields are Arc-wrapped)
///
/// Owns the set of live loaders, the waiting queue, and the admission
/// policy; it is the single authority over whether a task is currently
/// running. One command-dispatch loop consumes the control channel, so
/// commands apply in arrival order.
#[derive(Clone)]
pub struct MultiDownloader {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query task state
    pub db: std::sync::Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: std::sync::Arc<Config>,
    /// Queue and admission state
    pub(crate) queue_state: QueueState,
    /// Live loaders keyed by identity; at most one per task
    pub(crate) loaders:
        std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<TaskId, std::sync::Arc<Loader>>>>,
    /// Ordered control channel feeding the dispatch loop
    pub(crate) command_tx: tokio::sync::mpsc::UnboundedSender<Command>,
    /// Builds protocol adapters; swapped for scripted adapters in tests
    pub(crate) adapter_factory: std::sync::Arc<dyn crate::adapter::AdapterFactory>,
    /// Cancelled once, at shutdown; stops the background loops
    pub(crate) shutdown_token: tokio_util::sync::CancellationToken,
}

/// Internal struct representing a task in the waiting queue
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct QueuedTask {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    pub(crate) created_at: i64, // Unix timestamp for tie-breaking
}

// Implement Ord for BinaryHeap (max-heap by default)
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            std::cmp::Ordering::Equal => {
                // Equal priorities admit FIFO: older (lower timestamp) wins,
                // hence the reversed comparison under a max-heap
                other.created_at.cmp(&self.created_at)
            }
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl MultiDownloader {
    /// Create a new MultiDownloader instance
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite task store and runs migrations
    /// - Sets up the event broadcast channel
    /// - Restores interrupted task state from the previous session
    /// - Starts the command-dispatch and admission loops
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;

        // Buffered so multiple subscribers can each lag a little without
        // dropping transitions
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1024);

        let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();

        let queue_state = QueueState {
            queue: std::sync::Arc::new(tokio::sync::Mutex::new(
                std::collections::BinaryHeap::new(),
            )),
            concurrent_limit: std::sync::Arc::new(tokio::sync::Semaphore::new(
                config.download.max_concurrent_tasks,
            )),
            active: std::sync::Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };

        let engine = Self {
            db: std::sync::Arc::new(db),
            event_tx,
            config: std::sync::Arc::new(config),
            queue_state,
            loaders: std::sync::Arc::new(tokio::sync::Mutex::new(
                std::collections::HashMap::new(),
            )),
            command_tx,
            adapter_factory: std::sync::Arc::new(crate::adapter::DefaultAdapterFactory),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        };

        // Pick up where the previous session left off; nothing restarts
        // until a resume command arrives
        engine.restore_interrupted().await?;

        engine.clone().start_command_loop(command_rx);
        engine.clone().start_queue_processor();

        Ok(engine)
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all
    /// events independently. Events are buffered, but a subscriber that
    /// falls behind by more than the buffer size receives a
    /// `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> std::sync::Arc<Config> {
        std::sync::Arc::clone(&self.config)
    }

    /// Snapshot of queue occupancy: how many tasks are waiting for
    /// admission and how many are actively transferring
    pub async fn stats(&self) -> QueueStats {
        let waiting = self.queue_state.queue.lock().await.len();
        let transferring = self.queue_state.active.lock().await.len();
        QueueStats {
            waiting,
            transferring,
        }
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is dropped; transfers
    /// never block on an absent listener.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
