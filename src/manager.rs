//! Batch transfer orchestration.
//!
//! Ties the registry and the ledger together: resolve a handler, record
//! the `starting` snapshot, run the transfer under the concurrent-download
//! bound, persist the terminal record. Ledger failures are logged and
//! never fail a transfer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TransferConfig;
use crate::engine::ProgressSink;
use crate::handlers::registry::{ProtocolRegistry, RegistryError};
use crate::handlers::types::{TransferRecord, TransferStatus, TransferUpdate};
use crate::ledger::DownloadLedger;

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct TransferManager {
    registry: Arc<ProtocolRegistry>,
    ledger: Arc<DownloadLedger>,
    /// Bounds concurrent transfers; per-file connection fan-out is bounded
    /// separately inside the engine.
    downloads: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl TransferManager {
    pub fn new(
        registry: Arc<ProtocolRegistry>,
        ledger: Arc<DownloadLedger>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            downloads: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by every transfer this manager runs. Cancelling it
    /// propagates into all in-flight range fetchers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one transfer to its terminal record.
    ///
    /// `NoHandler` surfaces immediately with no ledger state created;
    /// every other outcome, success or failure, is a terminal record that
    /// is also persisted (best-effort) to the ledger.
    pub async fn submit(&self, url: &str, dest: &Path) -> Result<TransferRecord, RegistryError> {
        let handler = self.registry.resolve(url)?;

        let starting = TransferRecord::new(url, handler.protocol(), dest);
        if let Err(err) = self.ledger.record(starting).await {
            warn!(url, error = %err, "failed to persist starting record");
        }

        let Ok(_permit) = self.downloads.acquire().await else {
            // Semaphore closed only happens on shutdown.
            let record = TransferRecord::failed(url, handler.protocol(), dest, "shutting down");
            self.persist_terminal(&record).await;
            return Ok(record);
        };

        if let Err(err) = self
            .ledger
            .update(
                url,
                &TransferUpdate {
                    status: Some(TransferStatus::Downloading),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(url, error = %err, "failed to persist status update");
        }

        info!(url, protocol = handler.protocol(), "transfer dispatched");
        let sink = Arc::new(ProgressSink::new());
        let poller = self.spawn_progress_poller(url, Arc::clone(&sink));
        let record = handler
            .download(url, dest, sink, self.cancel.child_token())
            .await;
        poller.abort();
        self.persist_terminal(&record).await;
        Ok(record)
    }

    /// Feed in-flight progress from the handler's sink into the ledger's
    /// active entry, so observers see the transfer move before the
    /// terminal update lands. Aborted once the handler returns.
    fn spawn_progress_poller(
        &self,
        url: &str,
        sink: Arc<ProgressSink>,
    ) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(&self.ledger);
        let url = url.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(snapshot) = sink.snapshot() else {
                    continue;
                };
                let changes = TransferUpdate {
                    progress: Some(snapshot.percent),
                    speed: Some(snapshot.speed),
                    ..Default::default()
                };
                if let Err(err) = ledger.update(&url, &changes).await {
                    warn!(url = %url, error = %err, "failed to persist progress update");
                }
            }
        })
    }

    /// Download a batch of URLs into `dir`, concurrently, bounded by
    /// `max_concurrent_downloads`. Results come back in input order.
    pub async fn download_all(
        &self,
        urls: Vec<String>,
        dir: &Path,
    ) -> Vec<Result<TransferRecord, RegistryError>> {
        let mut tasks = JoinSet::new();
        for (position, url) in urls.iter().cloned().enumerate() {
            let manager = self.clone();
            let dest = destination_for(&url, dir);
            tasks.spawn(async move { (position, manager.submit(&url, &dest).await) });
        }

        let mut results: Vec<Option<Result<TransferRecord, RegistryError>>> = Vec::new();
        results.resize_with(urls.len(), || None);
        while let Some(joined) = tasks.join_next().await {
            if let Ok((position, result)) = joined {
                results[position] = Some(result);
            }
        }

        // A slot left empty means its task panicked before reporting; it
        // still gets a terminal failed record, never a dispatch error.
        let mut ordered = Vec::with_capacity(urls.len());
        for (position, slot) in results.into_iter().enumerate() {
            match slot {
                Some(result) => ordered.push(result),
                None => {
                    let url = &urls[position];
                    warn!(url = %url, "download task panicked");
                    let record = TransferRecord::failed(
                        url,
                        "unknown",
                        &destination_for(url, dir),
                        "download task panicked",
                    );
                    self.persist_terminal(&record).await;
                    ordered.push(Ok(record));
                }
            }
        }
        ordered
    }

    async fn persist_terminal(&self, record: &TransferRecord) {
        if let Err(err) = self
            .ledger
            .update(&record.url, &TransferUpdate::terminal(record))
            .await
        {
            warn!(url = %record.url, error = %err, "failed to persist terminal record");
        }
    }
}

/// Destination file for a URL inside a target directory: the last path
/// segment of the URL, or a generic name when the URL has none.
pub fn destination_for(url: &str, dir: &Path) -> PathBuf {
    let name = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download.bin".to_string());
    dir.join(name)
}
