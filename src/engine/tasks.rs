//! Task and group registration plus record lookups.
//!
//! `add`/`add_group` are the only way identities come into existence;
//! control commands on a bare identity that was never added fail with a
//! not-found error at the call site.

use crate::db::{NewGroup, NewTask, TaskFilter, TaskRecord};
use crate::error::{Error, Result, TaskError};
use crate::options::{GroupOptions, TaskOptions, member_source_key};
use crate::types::{Event, GroupId, GroupKind, Status, TaskId};

use super::MultiDownloader;

impl MultiDownloader {
    /// Register a transfer task
    ///
    /// Identity is deterministic: adding the same normalized source twice
    /// returns the existing task instead of creating a second record. The
    /// task does not start until [`start`](Self::start) is called.
    pub async fn add(&self, options: TaskOptions) -> Result<TaskId> {
        if !self
            .queue_state
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        let source_key = options.source_key();
        if let Some(existing) = self.db.find_by_source_key(&source_key).await? {
            tracing::debug!(
                task_id = existing.id,
                url = %options.url,
                "source already registered, reusing task"
            );
            return Ok(TaskId(existing.id));
        }

        let id = self
            .db
            .insert_task(&NewTask {
                source_key,
                url: options.url.clone(),
                file_path: options.file_path.display().to_string(),
                protocol: options.source.kind().to_i32(),
                options: serde_json::to_string(&options.source)?,
                status: Status::Waiting.to_i32(),
                priority: options.priority as i32,
                is_group_child: false,
                group_id: None,
            })
            .await?;

        tracing::info!(task_id = id.0, url = %options.url, "task registered");
        self.emit_event(Event::TaskCreated {
            id,
            url: options.url,
        });

        Ok(id)
    }

    /// Register a composite task
    ///
    /// URL-list members are materialized immediately; FTP-directory members
    /// are enumerated when the group first starts. Group identity is a hash
    /// over the ordered member set, so re-adding the same set returns the
    /// existing group.
    pub async fn add_group(&self, options: GroupOptions) -> Result<GroupId> {
        if !self
            .queue_state
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        let group_hash = options.group_hash();
        if let Some(existing) = self.db.find_group_by_hash(&group_hash).await? {
            tracing::debug!(group_id = existing.id, "group already registered, reusing");
            return Ok(GroupId(existing.id));
        }

        let id = self
            .db
            .insert_group(&NewGroup {
                group_hash: group_hash.clone(),
                kind: options.kind.to_i32(),
                source_url: options.dir_url.clone(),
                dir_path: options.dir_path.display().to_string(),
                options: serde_json::to_string(&options)?,
                member_count: options.urls.len() as i64,
            })
            .await?;

        if options.kind == GroupKind::UrlList {
            for url in &options.urls {
                let member = TaskOptions::http(url.clone(), member_file_path(&options, url))?
                    .with_priority(options.priority);
                self.db
                    .insert_task(&NewTask {
                        source_key: member_source_key(&group_hash, url),
                        url: member.url.clone(),
                        file_path: member.file_path.display().to_string(),
                        protocol: member.source.kind().to_i32(),
                        options: serde_json::to_string(&member.source)?,
                        status: Status::Waiting.to_i32(),
                        priority: member.priority as i32,
                        is_group_child: true,
                        group_id: Some(id.get()),
                    })
                    .await?;
            }
        }

        tracing::info!(
            group_id = id.0,
            member_count = options.urls.len(),
            "group registered"
        );
        self.emit_event(Event::GroupCreated {
            id,
            member_count: options.urls.len(),
        });

        Ok(id)
    }

    /// Get a task record by identity
    pub async fn task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        self.db.get_task(id).await
    }

    /// Find standalone tasks whose source matches a URL
    ///
    /// Group members never match; the same URL inside a group carries a
    /// group-scoped identity.
    pub async fn find_by_url(&self, url: &str) -> Result<Vec<TaskRecord>> {
        self.db.find_by_url(url).await
    }

    /// Whether a standalone task for this URL exists
    pub async fn task_exists(&self, url: &str) -> Result<bool> {
        self.db.task_exists(url).await
    }

    /// Whether a group over exactly this ordered URL set exists
    pub async fn group_exists(&self, urls: &[String]) -> Result<bool> {
        let hash = crate::options::group_hash_for_urls(urls);
        Ok(self.db.find_group_by_hash(&hash).await?.is_some())
    }

    /// Get a group record by identity
    pub async fn group(&self, id: GroupId) -> Result<Option<crate::db::GroupRecord>> {
        self.db.get_group(id).await
    }

    /// List all groups
    pub async fn group_list(&self) -> Result<Vec<crate::db::GroupRecord>> {
        self.db.list_groups().await
    }

    /// Paginated listing of standalone tasks
    ///
    /// `page` is 1-based. Both parameters must be positive; anything else
    /// is rejected before the store is queried.
    pub async fn task_list(
        &self,
        filter: TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<TaskRecord>> {
        if page == 0 || page_size == 0 {
            return Err(Error::Task(TaskError::InvalidPage { page, page_size }));
        }
        self.db.list_tasks(filter, page, page_size).await
    }
}

/// Destination path for a group member: the group directory plus the URL's
/// final path segment, falling back to the member's position for opaque URLs.
fn member_file_path(options: &GroupOptions, url: &str) -> std::path::PathBuf {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let position = options.urls.iter().position(|u| u == url).unwrap_or(0);
            format!("member-{position}")
        });
    options.dir_path.join(name)
}
