//! Core types for multi-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a transfer task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode so TaskId binds directly in queries
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Unique identifier for a task group (URL list or FTP directory)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl GroupId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for GroupId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for GroupId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for GroupId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task status
///
/// The persisted half of the loader state machine. `Waiting` covers both a
/// freshly created task and one queued for admission; the live loader tracks
/// which phase it is actually in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created or queued, waiting for admission
    Waiting,
    /// Metadata probe in flight
    Discovering,
    /// Bytes are moving
    Transferring,
    /// Explicitly stopped; checkpoint retained
    Stopped,
    /// Successfully completed
    Complete,
    /// Failed with error (retry budget exhausted or permanent)
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Waiting,
            1 => Status::Discovering,
            2 => Status::Transferring,
            3 => Status::Stopped,
            4 => Status::Complete,
            5 => Status::Failed,
            _ => Status::Failed,
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Waiting => 0,
            Status::Discovering => 1,
            Status::Transferring => 2,
            Status::Stopped => 3,
            Status::Complete => 4,
            Status::Failed => 5,
        }
    }

    /// Whether this status is terminal for the current run of a loader
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Stopped | Status::Complete | Status::Failed)
    }
}

/// Task priority
///
/// Orders the waiting queue; equal priorities admit FIFO by creation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority (-1)
    Low = -1,
    /// Normal priority (0)
    #[default]
    Normal = 0,
    /// High priority (1)
    High = 1,
}

impl Priority {
    /// Convert integer priority code to Priority enum
    pub fn from_i32(priority: i32) -> Self {
        match priority {
            -1 => Priority::Low,
            0 => Priority::Normal,
            1 => Priority::High,
            _ => Priority::Normal,
        }
    }
}

/// Protocol family of a single transfer task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// HTTP or HTTPS single file
    Http,
    /// FTP single file
    Ftp,
}

impl ProtocolKind {
    /// Convert integer code to ProtocolKind
    pub fn from_i32(kind: i32) -> Self {
        match kind {
            1 => ProtocolKind::Ftp,
            _ => ProtocolKind::Http,
        }
    }

    /// Convert ProtocolKind to integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            ProtocolKind::Http => 0,
            ProtocolKind::Ftp => 1,
        }
    }
}

/// Kind of a task group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Explicit list of member URLs
    UrlList,
    /// FTP directory; members enumerated by listing
    FtpDir,
}

impl GroupKind {
    /// Convert integer code to GroupKind
    pub fn from_i32(kind: i32) -> Self {
        match kind {
            1 => GroupKind::FtpDir,
            _ => GroupKind::UrlList,
        }
    }

    /// Convert GroupKind to integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            GroupKind::UrlList => 0,
            GroupKind::FtpDir => 1,
        }
    }
}

/// Metadata reported by a protocol adapter's discovery probe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Total size in bytes, if the source reports one
    pub size: Option<u64>,
    /// Whether the source supports partial resume (ranged GET / FTP REST)
    pub resumable: bool,
}

/// Event emitted during a task's lifecycle
///
/// Delivered through the broadcast channel returned by
/// [`subscribe`](crate::engine::MultiDownloader::subscribe). Delivery is
/// at-least-once per subscriber; slow subscribers may observe a lag error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task record created
    TaskCreated {
        /// Task ID
        id: TaskId,
        /// Source URL
        url: String,
    },

    /// Group record created
    GroupCreated {
        /// Group ID
        id: GroupId,
        /// Number of known members (0 until an FTP directory is enumerated)
        member_count: usize,
    },

    /// Metadata probe started
    Discovering {
        /// Task ID
        id: TaskId,
    },

    /// Queued, waiting for admission under the concurrency limit
    Waiting {
        /// Task ID
        id: TaskId,
    },

    /// Admitted; transfer is active
    Transferring {
        /// Task ID
        id: TaskId,
    },

    /// Coalesced progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Bytes completed so far (monotonically non-decreasing per task)
        completed_bytes: u64,
        /// Total size, once discovery has reported one
        total_bytes: Option<u64>,
        /// Progress percentage, when the total is known
        percent: Option<f32>,
        /// Current speed in bytes per second
        speed_bps: u64,
    },

    /// Transfer completed
    Complete {
        /// Task ID
        id: TaskId,
        /// Destination file path
        path: PathBuf,
    },

    /// Transfer failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
        /// Whether a retry was scheduled
        retry_scheduled: bool,
        /// Attempt number that failed (1-based)
        attempt: u32,
    },

    /// Task stopped by command; checkpoint flushed
    Stopped {
        /// Task ID
        id: TaskId,
    },

    /// Task record removed
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// All members of a group reached Complete
    GroupComplete {
        /// Group ID
        id: GroupId,
    },

    /// stop_all finished: running loaders cancelled, waiting queue cleared
    QueueStopped,

    /// resume_all finished: incomplete tasks re-submitted for admission
    QueueResumed,

    /// Engine shut down
    Shutdown,
}

/// Snapshot of queue occupancy
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting for admission
    pub waiting: usize,
    /// Tasks with an active transfer
    pub transferring: usize,
}
