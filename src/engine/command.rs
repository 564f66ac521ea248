//! Command values, the ordered dispatch channel, and the public control surface.
//!
//! Every control operation is a value object pushed onto one unbounded
//! channel with a single consumer, so commands apply in arrival order:
//! a stop-all issued before an individual start is processed before it.
//! Validation happens synchronously at the call site; only validated
//! commands enter the channel.

use crate::error::{Error, Result, TaskError};
use crate::types::{GroupId, TaskId};

use super::MultiDownloader;

/// One control operation, consumed exactly once by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Begin (or re-begin) discovery and admission for the target
    Start { target: Target },
    /// Stop the target, keeping records and checkpoints
    Stop { target: Target },
    /// Re-apply admission to the target, resuming from its checkpoint
    Resume { target: Target },
    /// Remove the target's records, optionally deleting files on disk
    Cancel { target: Target, remove_file: bool },
}

/// What a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// A single task
    Task(TaskId),
    /// A composite task and all of its members
    Group(GroupId),
    /// Every known task and group
    All,
}

impl MultiDownloader {
    /// Start a task
    ///
    /// The task must have been created with [`add`](Self::add) first; a bare
    /// identity with no record fails with a not-found error, and a task
    /// that already completed fails with an invalid-state error. The actual
    /// state transition happens asynchronously through the command channel.
    pub async fn start(&self, id: TaskId) -> Result<()> {
        self.require_startable(id, "start").await?;
        self.send_command(Command::Start {
            target: Target::Task(id),
        })
    }

    /// Stop a task, keeping its record and checkpoint
    ///
    /// Idempotent: stopping an already-stopped or merely queued task is a
    /// no-op that still reports success.
    pub async fn stop(&self, id: TaskId) -> Result<()> {
        self.require_task(id).await?;
        self.send_command(Command::Stop {
            target: Target::Task(id),
        })
    }

    /// Resume a task from its last flushed checkpoint
    ///
    /// Sources that reported resumability continue where they left off;
    /// everything else restarts from byte zero. Resuming a completed task
    /// fails with an invalid-state error.
    pub async fn resume(&self, id: TaskId) -> Result<()> {
        self.require_startable(id, "resume").await?;
        self.send_command(Command::Resume {
            target: Target::Task(id),
        })
    }

    /// Cancel a task and remove its record
    ///
    /// With `remove_file` set, the destination file is deleted whether the
    /// task completed or not; otherwise whatever reached disk stays.
    pub async fn cancel(&self, id: TaskId, remove_file: bool) -> Result<()> {
        self.require_task(id).await?;
        self.send_command(Command::Cancel {
            target: Target::Task(id),
            remove_file,
        })
    }

    /// Start a group: enumerate members if needed, then schedule every
    /// incomplete member
    pub async fn start_group(&self, id: GroupId) -> Result<()> {
        self.require_group(id).await?;
        self.send_command(Command::Start {
            target: Target::Group(id),
        })
    }

    /// Stop every member of a group
    pub async fn stop_group(&self, id: GroupId) -> Result<()> {
        self.require_group(id).await?;
        self.send_command(Command::Stop {
            target: Target::Group(id),
        })
    }

    /// Resume every incomplete member of a group
    pub async fn resume_group(&self, id: GroupId) -> Result<()> {
        self.require_group(id).await?;
        self.send_command(Command::Resume {
            target: Target::Group(id),
        })
    }

    /// Cancel a group: cancel every member, then remove the group record
    pub async fn cancel_group(&self, id: GroupId, remove_file: bool) -> Result<()> {
        self.require_group(id).await?;
        self.send_command(Command::Cancel {
            target: Target::Group(id),
            remove_file,
        })
    }

    /// Stop every running task and clear the waiting queue
    ///
    /// Records and checkpoints are kept; a later resume continues from them.
    pub fn stop_all(&self) -> Result<()> {
        self.send_command(Command::Stop {
            target: Target::All,
        })
    }

    /// Re-apply admission to every incomplete persisted task
    ///
    /// Tasks are scheduled through the normal waiting queue, never started
    /// unconditionally; the concurrency limit still decides who runs.
    pub fn resume_all(&self) -> Result<()> {
        self.send_command(Command::Resume {
            target: Target::All,
        })
    }

    /// Cancel every task and group, removing all records
    ///
    /// With `remove_file` set, completed tasks' backing files are deleted
    /// along with partial files; otherwise files on disk are left alone.
    pub fn cancel_all(&self, remove_file: bool) -> Result<()> {
        self.send_command(Command::Cancel {
            target: Target::All,
            remove_file,
        })
    }

    /// Push a command onto the ordered dispatch channel
    fn send_command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ShuttingDown)
    }

    async fn require_task(&self, id: TaskId) -> Result<()> {
        self.db
            .get_task(id)
            .await?
            .map(|_| ())
            .ok_or_else(|| Error::Task(TaskError::NotFound { id: id.get() }))
    }

    async fn require_startable(&self, id: TaskId, operation: &str) -> Result<()> {
        let record = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::Task(TaskError::NotFound { id: id.get() }))?;
        if record.is_complete {
            return Err(Error::Task(TaskError::InvalidState {
                id: id.get(),
                operation: operation.to_string(),
                current_state: "complete".to_string(),
            }));
        }
        Ok(())
    }

    async fn require_group(&self, id: GroupId) -> Result<()> {
        self.db
            .get_group(id)
            .await?
            .map(|_| ())
            .ok_or_else(|| Error::Task(TaskError::GroupNotFound { id: id.get() }))
    }

    /// Start the command-dispatch loop: the single consumer of the control
    /// channel, processing commands strictly in arrival order.
    pub(crate) fn start_command_loop(
        self,
        mut command_rx: tokio::sync::mpsc::UnboundedReceiver<Command>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => break,
                    command = command_rx.recv() => {
                        let Some(command) = command else { break };
                        self.dispatch(command).await;
                    }
                }
            }
        })
    }

    /// Apply one command to its resolved target(s).
    pub(crate) async fn dispatch(&self, command: Command) {
        tracing::debug!(?command, "dispatching command");

        let result = match command {
            Command::Start { target } | Command::Resume { target } => match target {
                Target::Task(id) => self.handle_start(id).await,
                Target::Group(id) => self.handle_start_group(id).await,
                Target::All => self.handle_resume_all().await,
            },
            Command::Stop { target } => match target {
                Target::Task(id) => self.handle_stop(id).await,
                Target::Group(id) => self.handle_stop_group(id).await,
                Target::All => self.handle_stop_all().await,
            },
            Command::Cancel {
                target,
                remove_file,
            } => match target {
                Target::Task(id) => self.handle_cancel(id, remove_file).await,
                Target::Group(id) => self.handle_cancel_group(id, remove_file).await,
                Target::All => self.handle_cancel_all(remove_file).await,
            },
        };

        // Command effects are asynchronous; failures are logged, and task
        // failures additionally surface through the event channel.
        if let Err(e) = result {
            tracing::error!(error = %e, "command dispatch failed");
        }
    }
}
