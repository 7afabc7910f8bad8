//! BitTorrent capability slot.
//!
//! The predicate and the record contract are real; the peer-wire
//! implementation is not part of this core. Until a torrent backend is
//! wired in, matched URLs resolve to an explicit failed record rather
//! than falling through to a handler that cannot service them.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::traits::ProtocolHandler;
use super::types::TransferRecord;
use crate::engine::ProgressSink;

pub struct TorrentHandler;

impl TorrentHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TorrentHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for TorrentHandler {
    fn protocol(&self) -> &'static str {
        "torrent"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("magnet:") || url.ends_with(".torrent")
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        _progress: Arc<ProgressSink>,
        _cancel: CancellationToken,
    ) -> TransferRecord {
        warn!(url, "torrent transport requested but not available");
        TransferRecord::failed(
            url,
            self.protocol(),
            dest,
            "torrent transport is not available in this build",
        )
    }
}
