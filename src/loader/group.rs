//! Composite-task support: member materialization and completion rollup.
//!
//! A group never transfers bytes itself. Its members are ordinary tasks,
//! independently schedulable through the same queue; the group record just
//! aggregates their completion. One permanently failing member leaves its
//! siblings running and the group incomplete.

use crate::adapter::{FtpAdapter, MemberEnumerator};
use crate::db::{GroupRecord, NewTask};
use crate::engine::MultiDownloader;
use crate::error::Result;
use crate::options::{GroupOptions, SourceSpec, member_source_key};
use crate::types::{Event, GroupId, GroupKind, Status, TaskId};
use std::path::Path;

/// Materialize member tasks for a group that needs enumeration.
///
/// URL-list groups created their members at registration; FTP-directory
/// groups list the directory exactly once, the first time they start.
pub(crate) async fn ensure_group_members(
    engine: &MultiDownloader,
    group: &GroupRecord,
) -> Result<()> {
    if GroupKind::from_i32(group.kind) != GroupKind::FtpDir {
        return Ok(());
    }
    if !engine.db.group_children(group.id).await?.is_empty() {
        return Ok(());
    }

    let options: GroupOptions = serde_json::from_str(&group.options)?;
    let lister = FtpAdapter::new(group.source_url.clone(), options.credentials.clone())?;
    let members = lister.enumerate_members().await?;

    tracing::info!(
        group_id = group.id,
        member_count = members.len(),
        dir_url = %group.source_url,
        "enumerated ftp directory"
    );

    for member in &members {
        let file_path = Path::new(&group.dir_path).join(&member.file_name);
        engine
            .db
            .insert_task(&NewTask {
                source_key: member_source_key(&group.group_hash, &member.url),
                url: member.url.clone(),
                file_path: file_path.display().to_string(),
                protocol: crate::types::ProtocolKind::Ftp.to_i32(),
                options: serde_json::to_string(&SourceSpec::Ftp {
                    credentials: options.credentials.clone(),
                })?,
                status: Status::Waiting.to_i32(),
                priority: options.priority as i32,
                is_group_child: true,
                group_id: Some(group.id),
            })
            .await?;
    }

    engine
        .db
        .update_member_count(GroupId(group.id), members.len() as i64)
        .await?;

    Ok(())
}

/// Roll a completed member up into its group: when the last incomplete
/// member finishes, the group flips to complete in the same logical step.
pub(crate) async fn check_group_completion(engine: &MultiDownloader, task_id: TaskId) {
    let record = match engine.db.get_task(task_id).await {
        Ok(Some(record)) => record,
        _ => return,
    };
    let Some(group_id) = record.group_id else {
        return;
    };

    match engine.db.incomplete_children(group_id).await {
        Ok(0) => {
            let id = GroupId(group_id);
            match engine.db.mark_group_complete(id).await {
                Ok(true) => {
                    tracing::info!(group_id, "group complete");
                    engine.emit_event(Event::GroupComplete { id });
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(group_id, error = %e, "failed to mark group complete");
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(group_id, error = %e, "failed to count incomplete group members");
        }
    }
}
