//! Protocol adapters — per-protocol metadata probing and byte transfer.
//!
//! Every protocol implements the same two-operation contract so the loader
//! can drive HTTP and FTP transfers through one execution skeleton. The
//! adapter is selected from the task options' protocol tag at loader
//! construction; nothing protocol-specific leaks into the scheduler.

mod ftp;
mod http;

pub(crate) use ftp::FtpAdapter;
pub(crate) use http::HttpAdapter;

use crate::config::Config;
use crate::error::Result;
use crate::loader::checkpoint::Checkpoint;
use crate::options::SourceSpec;
use crate::types::{SourceMetadata, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a transfer needs besides the protocol itself: where to write,
/// how to notice cancellation, and the shared checkpoint counters.
pub(crate) struct TransferCtx {
    pub id: TaskId,
    pub file_path: PathBuf,
    pub cancel: CancellationToken,
    pub checkpoint: Arc<Checkpoint>,
}

/// Per-protocol strategy for one transfer unit.
#[async_trait::async_trait]
pub(crate) trait ProtocolAdapter: Send + Sync {
    /// Probe the source without moving payload bytes: total size (when the
    /// source reports one) and whether partial resume is supported.
    async fn fetch_metadata(&self) -> Result<SourceMetadata>;

    /// Move the bytes described by the checkpoint. Must observe `ctx.cancel`
    /// between chunks and leave the checkpoint counters accurate on any
    /// exit, success or not.
    async fn transfer(&self, ctx: &TransferCtx) -> Result<()>;
}

/// One child source produced by enumerating a directory-like target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MemberSource {
    pub url: String,
    pub file_name: String,
}

/// Directory/group sources additionally enumerate their members, once,
/// before any child task is scheduled.
#[async_trait::async_trait]
pub(crate) trait MemberEnumerator: Send + Sync {
    async fn enumerate_members(&self) -> Result<Vec<MemberSource>>;
}

/// Constructs the adapter for a task's protocol tag; a trait so tests can
/// substitute scripted adapters.
pub(crate) trait AdapterFactory: Send + Sync {
    /// Build the adapter for one task.
    fn build(
        &self,
        url: &str,
        source: &SourceSpec,
        config: &Config,
    ) -> Result<Arc<dyn ProtocolAdapter>>;
}

/// Production factory: a tagged match on the protocol kind.
pub(crate) struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn build(
        &self,
        url: &str,
        source: &SourceSpec,
        config: &Config,
    ) -> Result<Arc<dyn ProtocolAdapter>> {
        match source {
            SourceSpec::Http { headers } => Ok(Arc::new(HttpAdapter::new(
                url.to_string(),
                headers.clone(),
                config,
            )?)),
            SourceSpec::Ftp { credentials } => Ok(Arc::new(FtpAdapter::new(
                url.to_string(),
                credentials.clone(),
            )?)),
        }
    }
}
