//! Transfer record types shared by handlers, engine, and ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Transfer lifecycle status. Transitions are monotonic: the variant
/// order is the only legal direction, and `completed`/`failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Starting,
    Downloading,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// The mutable-then-frozen state describing one download's lifecycle.
///
/// A handler creates the record in `starting` at dispatch time and owns
/// it exclusively while the transfer runs; the ledger owns the durable
/// copy afterwards. The `id` distinguishes history rows when the same URL
/// is queued more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub url: String,
    pub protocol: String,
    pub status: TransferStatus,
    /// Percentage in [0, 100].
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub file_size: Option<u64>,
    pub destination: PathBuf,
    pub checksum: Option<String>,
    pub speed: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TransferRecord {
    pub fn new(url: impl Into<String>, protocol: impl Into<String>, destination: &Path) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            protocol: protocol.into(),
            status: TransferStatus::Starting,
            progress: 0.0,
            started_at: Utc::now(),
            completed_at: None,
            file_size: None,
            destination: destination.to_path_buf(),
            checksum: None,
            speed: None,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Terminal failed record with a non-empty error message.
    pub fn failed(
        url: impl Into<String>,
        protocol: impl Into<String>,
        destination: &Path,
        error: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(url, protocol, destination);
        record.error = Some(error.into());
        record.advance(TransferStatus::Failed);
        record
    }

    /// Move the status forward. Backward transitions and transitions out
    /// of a terminal state are contract violations and are ignored.
    pub fn advance(&mut self, next: TransferStatus) {
        if self.status.is_terminal() || next <= self.status {
            warn!(
                url = %self.url,
                from = ?self.status,
                to = ?next,
                "ignoring non-monotonic status transition"
            );
            return;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn set_progress(&mut self, percent: f64) {
        self.progress = percent.clamp(0.0, 100.0);
    }
}

/// Partial update merged into a ledger entry: only the supplied fields
/// change, everything else is left as recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferUpdate {
    pub status: Option<TransferStatus>,
    pub progress: Option<f64>,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub speed: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl TransferUpdate {
    /// Snapshot of a terminal record, for persisting the handler outcome
    /// over the `starting` entry recorded at dispatch time.
    pub fn terminal(record: &TransferRecord) -> Self {
        Self {
            status: Some(record.status),
            progress: Some(record.progress),
            file_size: record.file_size,
            checksum: record.checksum.clone(),
            speed: record.speed.clone(),
            error: record.error.clone(),
            metadata: if record.metadata.is_empty() {
                None
            } else {
                Some(record.metadata.clone())
            },
        }
    }

    pub fn apply(&self, record: &mut TransferRecord) {
        // A progress-only update racing the terminal snapshot must not
        // regress a finished record.
        if record.status.is_terminal() && self.status.is_none() {
            return;
        }
        if let Some(status) = self.status {
            record.advance(status);
        }
        if let Some(progress) = self.progress {
            record.set_progress(progress);
        }
        if let Some(file_size) = self.file_size {
            record.file_size = Some(file_size);
        }
        if let Some(checksum) = &self.checksum {
            record.checksum = Some(checksum.clone());
        }
        if let Some(speed) = &self.speed {
            record.speed = Some(speed.clone());
        }
        if let Some(error) = &self.error {
            record.error = Some(error.clone());
        }
        if let Some(metadata) = &self.metadata {
            record.metadata.extend(metadata.clone());
        }
    }
}
