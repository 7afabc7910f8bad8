//! Concurrent multi-connection download engine.
//!
//! The engine takes a resource of known size, partitions it into disjoint
//! byte ranges, fetches the ranges concurrently into a single pre-sized
//! output file, aggregates every chunk outcome, and verifies the result by
//! size (always) and checksum (on request).
//!
//! Failure policy: the fan-in barrier never short-circuits, so the error
//! set is complete before the transfer is declared failed; any fatal
//! outcome deletes the partial output file.

pub mod checksum;
pub mod error;
pub mod fetcher;
pub mod planner;
pub mod progress;

pub use error::{EngineError, FetchError, Result};
pub use planner::{ChunkRange, plan};
pub use progress::{ProgressSink, ProgressSnapshot, TransferProgress};

use std::path::Path;
use std::sync::Arc;

use reqwest::{Client, Proxy, header};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::handlers::types::{TransferRecord, TransferStatus};
use crate::probe::CapabilityProbe;
use fetcher::RangeFetcher;

/// Metadata returned by the header-only probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub size: Option<u64>,
    pub resume_support: bool,
    pub content_type: String,
    pub filename: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

pub struct DownloadEngine {
    client: Client,
    config: TransferConfig,
    probe: CapabilityProbe,
    /// Global budget across all transfers, so concurrent downloads times
    /// connections-per-file cannot over-subscribe the network.
    net_permits: Arc<tokio::sync::Semaphore>,
}

impl DownloadEngine {
    pub fn new(config: TransferConfig) -> Result<Self> {
        Self::with_probe(config, CapabilityProbe::detect())
    }

    pub fn with_probe(config: TransferConfig, probe: CapabilityProbe) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_tls)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            });

        if let Some(url) = &config.proxy {
            let proxy =
                Proxy::all(url).map_err(|e| EngineError::Client(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::Client(e.to_string()))?;

        let net_permits = Arc::new(tokio::sync::Semaphore::new(config.total_connection_budget()));

        Ok(Self {
            client,
            config,
            probe,
            net_permits,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }

    /// Header-only probe of a resource.
    ///
    /// Fails with [`EngineError::Metadata`] when the request cannot be
    /// completed; an absent or unparsable Content-Length surfaces as
    /// `size: None`, which `download` rejects before planning.
    pub async fn fetch_metadata(&self, url: &str) -> Result<ResourceMetadata> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| EngineError::Metadata(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Metadata(format!(
                "HEAD {url} returned {status}"
            )));
        }

        let headers = response.headers();
        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let resume_support = headers.contains_key(header::ACCEPT_RANGES);
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let etag = headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = headers
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        debug!(url, ?size, resume_support, %content_type, "metadata probe");

        Ok(ResourceMetadata {
            size,
            resume_support,
            content_type,
            filename,
            etag,
            last_modified,
        })
    }

    /// Download a resource into `dest` using `connections` concurrent
    /// range fetchers (caller's value, capped by the per-file limit, or
    /// the probe default).
    ///
    /// `progress` is bound to the live accumulator once the plan is
    /// known, so the caller can observe in-flight bytes and speed while
    /// the transfer runs.
    ///
    /// The returned record is terminal `completed`; every failure path
    /// removes the partial output file and returns an error instead.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        connections: Option<usize>,
        progress_sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TransferRecord> {
        let metadata = self.fetch_metadata(url).await?;
        let size = match metadata.size {
            Some(size) if size > 0 => size,
            _ => {
                return Err(EngineError::Metadata(format!(
                    "{url}: server did not report a usable content length"
                )));
            }
        };

        let connections = connections
            .unwrap_or_else(|| self.probe.optimal_connection_count())
            .min(self.config.max_connections_per_file)
            .max(1);

        let ranges = planner::plan(size, connections)?;

        let mut record = TransferRecord::new(url, "http", dest);
        record.file_size = Some(size);
        record
            .metadata
            .insert("content_type".to_string(), metadata.content_type.clone());
        record.metadata.insert(
            "resume_support".to_string(),
            metadata.resume_support.to_string(),
        );
        if let Some(etag) = &metadata.etag {
            record.metadata.insert("etag".to_string(), etag.clone());
        }
        if let Some(last_modified) = &metadata.last_modified {
            record
                .metadata
                .insert("last_modified".to_string(), last_modified.clone());
        }

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Pre-size the destination so every fetcher can write at its own
        // offset without the file growing concurrently.
        let file = tokio::fs::File::create(dest).await?;
        file.set_len(size).await?;
        drop(file);

        record.advance(TransferStatus::Downloading);
        info!(url, size, connections, "starting download");

        let progress = Arc::new(TransferProgress::new(size, ranges.len()));
        progress_sink.bind(Arc::clone(&progress));
        let mut tasks = JoinSet::new();

        for range in &ranges {
            let fetcher = RangeFetcher::new(
                self.client.clone(),
                url.to_string(),
                *range,
                self.config.max_retries,
                self.config.chunk_size.as_usize(),
            );
            let dest = dest.to_path_buf();
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            let permits = Arc::clone(&self.net_permits);

            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| FetchError::Cancelled)?;
                fetcher.fetch(&dest, &progress, &cancel).await
            });
        }

        // Fan-in barrier: let every chunk resolve so the error set is
        // complete before deciding the transfer outcome.
        let mut bytes_written: u64 = 0;
        let mut first_error: Option<FetchError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(written)) => bytes_written += written,
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error =
                            Some(FetchError::Permanent(format!("chunk task failed: {join_err}")));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            self.remove_partial(dest).await;
            return Err(EngineError::ChunkFetch(err));
        }

        if bytes_written != size {
            // Guards against servers silently truncating a range response.
            self.remove_partial(dest).await;
            return Err(EngineError::SizeMismatch {
                expected: size,
                actual: bytes_written,
            });
        }

        record.speed = Some(progress.speed());
        record.set_progress(100.0);
        record.advance(TransferStatus::Completed);
        info!(url, size, speed = record.speed.as_deref(), "download completed");

        Ok(record)
    }

    /// Stream a file through SHA-256 and compare against an expected hex
    /// digest. Mismatch is a `false` return, not an error.
    pub async fn verify_checksum(&self, path: &Path, expected_hex: &str) -> Result<bool> {
        checksum::verify_file(path, expected_hex, self.config.buffer_size.as_usize()).await
    }

    async fn remove_partial(&self, dest: &Path) {
        if let Err(err) = tokio::fs::remove_file(dest).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %dest.display(), error = %err, "failed to remove partial output");
        }
    }
}
