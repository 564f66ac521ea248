//! Database layer tests, organized by domain.

mod groups;
mod tasks;

use super::{Database, NewGroup, NewTask};
use crate::types::Status;
use std::sync::Arc;

/// Helper to create a test database backed by a temp file.
pub(super) async fn setup_db() -> (Arc<Database>, tempfile::NamedTempFile) {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (Arc::new(db), temp_file)
}

/// Helper to build a NewTask with sensible defaults for a given URL.
pub(super) fn new_task(url: &str) -> NewTask {
    NewTask {
        source_key: url.to_string(),
        url: url.to_string(),
        file_path: format!("/tmp/{}", url.rsplit('/').next().unwrap_or("file")),
        protocol: 0,
        options: r#"{"protocol":"http","headers":{}}"#.to_string(),
        status: Status::Stopped.to_i32(),
        priority: 0,
        is_group_child: false,
        group_id: None,
    }
}

/// Helper to build a NewGroup with sensible defaults.
pub(super) fn new_group(hash: &str) -> NewGroup {
    NewGroup {
        group_hash: hash.to_string(),
        kind: 0,
        source_url: String::new(),
        dir_path: "/tmp/group".to_string(),
        options: "{}".to_string(),
        member_count: 0,
    }
}
