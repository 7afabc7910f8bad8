//! Video-site capability slot.
//!
//! Matches known media hosts whose content needs extraction before it can
//! be fetched. Extraction itself is outside this core; matched URLs end
//! in an explicit failed record instead of being mangled by the plain
//! HTTP handler.

use async_trait::async_trait;
use reqwest::Url;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::traits::ProtocolHandler;
use super::types::TransferRecord;
use crate::engine::ProgressSink;

const MEDIA_HOSTS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com", "dailymotion.com"];

pub struct MediaHandler;

impl MediaHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MediaHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for MediaHandler {
    fn protocol(&self) -> &'static str {
        "media"
    }

    fn can_handle(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        MEDIA_HOSTS
            .iter()
            .any(|known| host == *known || host.ends_with(&format!(".{known}")))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        _progress: Arc<ProgressSink>,
        _cancel: CancellationToken,
    ) -> TransferRecord {
        warn!(url, "media extraction requested but not available");
        TransferRecord::failed(
            url,
            self.protocol(),
            dest,
            "media extraction is not available in this build",
        )
    }
}
