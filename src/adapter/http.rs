//! HTTP/HTTPS adapter — HEAD/range probing and multi-segment ranged GETs.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::loader::checkpoint::{OPEN_END, Span};
use crate::types::SourceMetadata;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{ProtocolAdapter, TransferCtx};

/// HTTP/HTTPS single-file adapter.
pub(crate) struct HttpAdapter {
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
}

impl HttpAdapter {
    pub(crate) fn new(
        url: String,
        headers: BTreeMap<String, String>,
        config: &Config,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.download.connect_timeout)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            url,
            headers,
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, &self.url);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for HttpAdapter {
    async fn fetch_metadata(&self) -> Result<SourceMetadata> {
        let response = self
            .request(reqwest::Method::HEAD)
            .send()
            .await
            .map_err(|e| Error::Discovery {
                reason: format!("HEAD {} failed: {e}", self.url),
                permanent: false,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Discovery {
                reason: format!("HEAD {} returned {status}", self.url),
                // 4xx rejections will not improve on retry
                permanent: status.is_client_error(),
            });
        }

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let mut resumable = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        // Servers that omit Accept-Ranges may still honor ranged GETs;
        // a one-byte probe settles it.
        if !resumable {
            let probe = self
                .request(reqwest::Method::GET)
                .header(reqwest::header::RANGE, "bytes=0-0")
                .send()
                .await
                .map_err(|e| Error::Discovery {
                    reason: format!("range probe for {} failed: {e}", self.url),
                    permanent: false,
                })?;
            resumable = probe.status() == reqwest::StatusCode::PARTIAL_CONTENT;
        }

        tracing::debug!(url = %self.url, ?size, resumable, "HTTP metadata probe complete");

        Ok(SourceMetadata { size, resumable })
    }

    async fn transfer(&self, ctx: &TransferCtx) -> Result<()> {
        if let Some(parent) = ctx.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if ctx.checkpoint.whole {
            return self.transfer_whole(ctx).await;
        }

        // Preallocate so segment writers can seek anywhere in the file.
        if let Some(total) = ctx.checkpoint.total {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&ctx.file_path)
                .await?;
            if file.metadata().await?.len() != total {
                file.set_len(total).await?;
            }
        }

        // Segment fetchers run on their own small budget, sized by the plan;
        // they never borrow from the task-level concurrency limit.
        let mut fetchers = JoinSet::new();
        for (i, span) in ctx.checkpoint.spans.iter().enumerate() {
            let done = ctx.checkpoint.counters[i].load(Ordering::Relaxed);
            if span.len().is_some_and(|len| done >= len) {
                continue;
            }

            fetchers.spawn(fetch_span(
                self.client.clone(),
                self.url.clone(),
                self.headers.clone(),
                ctx.file_path.clone(),
                *span,
                Arc::clone(&ctx.checkpoint.counters),
                i,
                ctx.cancel.clone(),
            ));
        }

        while let Some(joined) = fetchers.join_next().await {
            let result = joined.map_err(|e| Error::Transfer(format!("segment task failed: {e}")))?;
            if let Err(e) = result {
                // First failure wins; stop the remaining fetchers promptly.
                fetchers.abort_all();
                return Err(e);
            }
        }

        Ok(())
    }
}

impl HttpAdapter {
    /// Single unresumable stream: truncate and refetch everything.
    async fn transfer_whole(&self, ctx: &TransferCtx) -> Result<()> {
        ctx.checkpoint.counters[0].store(0, Ordering::Relaxed);

        let response = self
            .request(reqwest::Method::GET)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Transfer(format!("GET {} failed: {e}", self.url)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&ctx.file_path)
            .await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let bytes = chunk.map_err(Error::Network)?;
            file.write_all(&bytes).await?;
            ctx.checkpoint.counters[0].fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }
        file.flush().await?;

        Ok(())
    }
}

/// Fetch one span's remaining range and write it at its file offset.
#[allow(clippy::too_many_arguments)]
async fn fetch_span(
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
    path: PathBuf,
    span: Span,
    counters: Arc<Vec<AtomicU64>>,
    index: usize,
    cancel: CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let done = counters[index].load(Ordering::Relaxed);
    let start = span.start + done;
    let range = if span.end == OPEN_END {
        format!("bytes={start}-")
    } else {
        format!("bytes={start}-{}", span.end)
    };

    let mut builder = client.get(&url).header(reqwest::header::RANGE, range);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }

    let response = builder.send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::PARTIAL_CONTENT && !status.is_success() {
        return Err(Error::Transfer(format!(
            "ranged GET {url} returned {status}"
        )));
    }

    let mut file = OpenOptions::new().write(true).open(&path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            file.flush().await?;
            return Err(Error::Cancelled);
        }
        let bytes = chunk.map_err(Error::Network)?;
        file.write_all(&bytes).await?;
        counters[index].fetch_add(bytes.len() as u64, Ordering::Relaxed);
    }
    file.flush().await?;

    // A server that drops the connection early leaves the span short; report
    // it so the retry policy can re-enter with the checkpoint intact.
    if let Some(len) = span.len() {
        let now_done = counters[index].load(Ordering::Relaxed);
        if now_done < len {
            return Err(Error::Transfer(format!(
                "ranged GET {url} ended early: {now_done} of {len} bytes"
            )));
        }
    }

    Ok(())
}
