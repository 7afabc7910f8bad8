use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::Result;
use crate::handlers::types::{TransferRecord, TransferUpdate};

const HISTORY_FILE: &str = "history.json";

struct LedgerState {
    /// In-flight and most-recent transfers, keyed by resource URL.
    /// Re-queuing a URL overwrites the entry (last-write-wins); history
    /// keeps every snapshot.
    active: BTreeMap<String, TransferRecord>,
    /// Ordered sequence of durable snapshots, oldest first.
    history: Vec<TransferRecord>,
}

/// Durable record of active and historical transfers.
///
/// Persistence is a whole-store rewrite of `history.json` on every
/// mutation, staged through a temporary file and an atomic rename so a
/// crash never leaves a half-written store. Single-writer per process;
/// concurrent multi-process access is unsupported.
pub struct DownloadLedger {
    history_path: PathBuf,
    state: Mutex<LedgerState>,
}

impl DownloadLedger {
    /// Open the ledger in `dir`, loading any existing history file.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let history_path = dir.join(HISTORY_FILE);

        let history: Vec<TransferRecord> = match tokio::fs::read(&history_path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        info!(
            path = %history_path.display(),
            entries = history.len(),
            "ledger opened"
        );

        Ok(Self {
            history_path,
            state: Mutex::new(LedgerState {
                active: BTreeMap::new(),
                history,
            }),
        })
    }

    /// Insert a record into the active map and append a snapshot to the
    /// durable history.
    pub async fn record(&self, record: TransferRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(url = %record.url, status = ?record.status, "recording transfer");
        state.active.insert(record.url.clone(), record.clone());
        state.history.push(record);
        self.persist(&state.history).await
    }

    /// Merge the supplied fields into the active entry for `url` and
    /// rewrite its first history snapshot. Unknown URLs are a no-op.
    pub async fn update(&self, url: &str, changes: &TransferUpdate) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(entry) = state.active.get_mut(url) else {
            debug!(url, "update for unknown transfer ignored");
            return Ok(());
        };
        changes.apply(entry);
        let updated = entry.clone();

        if let Some(snapshot) = state.history.iter_mut().find(|r| r.url == url) {
            *snapshot = updated;
        }
        self.persist(&state.history).await
    }

    pub async fn query_active(&self) -> Vec<TransferRecord> {
        self.state.lock().await.active.values().cloned().collect()
    }

    pub async fn query_history(&self) -> Vec<TransferRecord> {
        self.state.lock().await.history.clone()
    }

    pub async fn clear_history(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.history.clear();
        self.persist(&state.history).await
    }

    async fn persist(&self, history: &[TransferRecord]) -> Result<()> {
        let payload = serde_json::to_vec_pretty(history)?;
        let tmp = self.history_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &self.history_path).await?;
        Ok(())
    }
}
