//! Shared test helpers: engine construction without network, scripted
//! adapters, and event collection.

use crate::adapter::{AdapterFactory, ProtocolAdapter, TransferCtx};
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::engine::{MultiDownloader, QueueState};
use crate::error::{Error, Result};
use crate::options::SourceSpec;
use crate::types::SourceMetadata;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Scripted adapter: transfers `size` bytes in timed chunks without
/// touching the network, recording where it started from.
pub(crate) struct MockAdapter {
    pub(crate) size: u64,
    pub(crate) resumable: bool,
    /// Bytes granted per tick
    pub(crate) chunk_size: u64,
    /// Delay per tick; zero completes almost instantly
    pub(crate) chunk_delay: Duration,
    /// Discovery failure script: Some(permanent)
    pub(crate) fail_discovery: Option<bool>,
    /// Transfer failure script: fail after this many bytes
    pub(crate) fail_transfer_after: Option<u64>,
    /// Byte offset observed at transfer start (resume verification)
    pub(crate) observed_start: Arc<Mutex<Vec<u64>>>,
}

impl MockAdapter {
    pub(crate) fn quick(size: u64) -> Self {
        Self {
            size,
            resumable: true,
            chunk_size: size.max(1),
            chunk_delay: Duration::ZERO,
            fail_discovery: None,
            fail_transfer_after: None,
            observed_start: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn slow(size: u64, chunk_size: u64, chunk_delay: Duration) -> Self {
        Self {
            chunk_size,
            chunk_delay,
            ..Self::quick(size)
        }
    }

    pub(crate) fn failing_discovery(permanent: bool) -> Self {
        Self {
            fail_discovery: Some(permanent),
            ..Self::quick(100)
        }
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for MockAdapter {
    async fn fetch_metadata(&self) -> Result<SourceMetadata> {
        if let Some(permanent) = self.fail_discovery {
            return Err(Error::Discovery {
                reason: "scripted discovery failure".into(),
                permanent,
            });
        }
        Ok(SourceMetadata {
            size: Some(self.size),
            resumable: self.resumable,
        })
    }

    async fn transfer(&self, ctx: &TransferCtx) -> Result<()> {
        let started_from = ctx.checkpoint.total_done();
        self.observed_start.lock().unwrap().push(started_from);

        let mut moved = 0u64;
        loop {
            let done = ctx.checkpoint.total_done();
            if done >= self.size {
                return Ok(());
            }
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(limit) = self.fail_transfer_after
                && moved >= limit
            {
                return Err(Error::Transfer("scripted transfer failure".into()));
            }
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }

            let grant = self.chunk_size.min(self.size - done);
            // Feed the first unfinished span, mirroring how real fetchers
            // advance their own counters
            for (i, span) in ctx.checkpoint.spans.iter().enumerate() {
                let span_done = ctx.checkpoint.counters[i].load(Ordering::Relaxed);
                let span_len = span.len().unwrap_or(self.size);
                if span_done < span_len {
                    let add = grant.min(span_len - span_done);
                    ctx.checkpoint.counters[i].fetch_add(add, Ordering::Relaxed);
                    moved += add;
                    break;
                }
            }
        }
    }
}

/// Factory returning scripted adapters by URL, with an instant-success
/// fallback for everything else.
pub(crate) struct MockAdapterFactory {
    pub(crate) by_url: Mutex<HashMap<String, Arc<MockAdapter>>>,
}

impl MockAdapterFactory {
    pub(crate) fn new() -> Self {
        Self {
            by_url: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn script(&self, url: &str, adapter: MockAdapter) -> Arc<MockAdapter> {
        let adapter = Arc::new(adapter);
        self.by_url
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::clone(&adapter));
        adapter
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn build(
        &self,
        url: &str,
        _source: &SourceSpec,
        _config: &Config,
    ) -> Result<Arc<dyn ProtocolAdapter>> {
        if let Some(adapter) = self.by_url.lock().unwrap().get(url) {
            return Ok(Arc::clone(adapter) as Arc<dyn ProtocolAdapter>);
        }
        Ok(Arc::new(MockAdapter::quick(100)))
    }
}

/// Test engine plus the pieces a test may want to drive explicitly.
pub(crate) struct TestEngine {
    pub(crate) engine: MultiDownloader,
    pub(crate) factory: Arc<MockAdapterFactory>,
    pub(crate) command_rx: tokio::sync::mpsc::UnboundedReceiver<super::Command>,
    pub(crate) _temp_dir: tempfile::TempDir,
}

impl TestEngine {
    /// Start the dispatch and admission loops, consuming the held receiver.
    pub(crate) fn start_loops(self) -> (MultiDownloader, Arc<MockAdapterFactory>, tempfile::TempDir) {
        self.engine.clone().start_command_loop(self.command_rx);
        self.engine.clone().start_queue_processor();
        (self.engine, self.factory, self._temp_dir)
    }
}

/// Create a test engine with a scripted adapter factory and no background
/// loops running; tests call handlers directly or start the loops.
pub(crate) async fn create_test_engine(max_concurrent: usize) -> TestEngine {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.max_concurrent_tasks = max_concurrent;
    config.download.progress_interval = Duration::from_millis(50);
    config.download.stall_timeout = Duration::from_secs(10);
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };

    std::fs::create_dir_all(&config.download.download_dir).unwrap();

    let db = Database::new(&config.persistence.database_path).await.unwrap();
    let (event_tx, _rx) = tokio::sync::broadcast::channel(1024);
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();

    let queue_state = QueueState {
        queue: Arc::new(tokio::sync::Mutex::new(std::collections::BinaryHeap::new())),
        concurrent_limit: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
        active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        accepting_new: Arc::new(std::sync::atomic::AtomicBool::new(true)),
    };

    let factory = Arc::new(MockAdapterFactory::new());

    let engine = MultiDownloader {
        db: Arc::new(db),
        event_tx,
        config: Arc::new(config),
        queue_state,
        loaders: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        command_tx,
        adapter_factory: Arc::clone(&factory) as Arc<dyn AdapterFactory>,
        shutdown_token: tokio_util::sync::CancellationToken::new(),
    };

    TestEngine {
        engine,
        factory,
        command_rx,
        _temp_dir: temp_dir,
    }
}

/// Wait until `predicate` holds, polling the engine, or panic after `timeout`.
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut predicate: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
