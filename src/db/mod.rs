//! Database layer for multi-dl
//!
//! SQLite persistence for task, group, and segment-checkpoint state — the
//! durable mirror the engine writes through on every significant transition.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Task record CRUD, lookups, and listing filters
//! - [`groups`] — Group record CRUD and completion queries
//! - [`segments`] — Per-segment checkpoints for resume support

use sqlx::{FromRow, sqlite::SqlitePool};

mod groups;
mod migrations;
mod segments;
mod tasks;

/// New task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Deterministic identity key (normalized URL, or group-scoped member key)
    pub source_key: String,
    /// Source URL
    pub url: String,
    /// Destination file path
    pub file_path: String,
    /// Protocol family code (see [`crate::types::ProtocolKind`])
    pub protocol: i32,
    /// Protocol-specific options as JSON (see [`crate::options::SourceSpec`])
    pub options: String,
    /// Initial status code
    pub status: i32,
    /// Queue priority
    pub priority: i32,
    /// Whether this task is a member of a group
    pub is_group_child: bool,
    /// Owning group, for group members
    pub group_id: Option<i64>,
}

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRecord {
    /// Unique database ID
    pub id: i64,
    /// Deterministic identity key
    pub source_key: String,
    /// Source URL
    pub url: String,
    /// Destination file path
    pub file_path: String,
    /// Protocol family code
    pub protocol: i32,
    /// Protocol-specific options as JSON
    pub options: String,
    /// Current status code
    pub status: i32,
    /// Queue priority
    pub priority: i32,
    /// Total size in bytes (-1 until discovery reports one)
    pub total_bytes: i64,
    /// Bytes completed so far
    pub completed_bytes: i64,
    /// Whether the source supports partial resume
    pub resumable: bool,
    /// Whether the transfer has completed
    pub is_complete: bool,
    /// Whether this task is a member of a group
    pub is_group_child: bool,
    /// Owning group, for group members
    pub group_id: Option<i64>,
    /// Error message if the task failed
    pub error_message: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp when the task completed
    pub completed_at: Option<i64>,
}

/// New group to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewGroup {
    /// Deterministic identity hash over the ordered member URLs
    pub group_hash: String,
    /// Group kind code (see [`crate::types::GroupKind`])
    pub kind: i32,
    /// Directory URL for FTP-directory groups; empty for URL lists
    pub source_url: String,
    /// Destination directory for member files
    pub dir_path: String,
    /// Group options as JSON (credentials, priority)
    pub options: String,
    /// Number of known members
    pub member_count: i64,
}

/// Group record from database
#[derive(Debug, Clone, FromRow)]
pub struct GroupRecord {
    /// Unique database ID
    pub id: i64,
    /// Deterministic identity hash
    pub group_hash: String,
    /// Group kind code
    pub kind: i32,
    /// Directory URL for FTP-directory groups
    pub source_url: String,
    /// Destination directory for member files
    pub dir_path: String,
    /// Group options as JSON
    pub options: String,
    /// Number of known members
    pub member_count: i64,
    /// Whether every member has completed
    pub is_complete: bool,
    /// Unix timestamp when the group was created
    pub created_at: i64,
}

/// Segment checkpoint record — the restartable unit of resume state
#[derive(Debug, Clone, Copy, FromRow)]
pub struct SegmentRecord {
    /// Owning task
    pub task_id: i64,
    /// Segment index within the task (0-based)
    pub seg_index: i64,
    /// First byte of the segment's range
    pub start_byte: i64,
    /// Last byte of the segment's range (inclusive)
    pub end_byte: i64,
    /// Bytes of this segment already on disk
    pub downloaded: i64,
}

/// Listing filter for task queries
///
/// All variants restrict to standalone tasks (non-group members) with a
/// nonempty destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFilter {
    /// Every standalone task
    #[default]
    All,
    /// Only completed tasks
    Complete,
    /// Only incomplete tasks
    Incomplete,
}

/// Database handle for multi-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
