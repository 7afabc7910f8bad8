//! HTTP/HTTPS handler backed by the multi-connection engine.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::traits::ProtocolHandler;
use super::types::TransferRecord;
use crate::engine::{DownloadEngine, ProgressSink};

pub struct HttpHandler {
    engine: Arc<DownloadEngine>,
}

impl HttpHandler {
    pub fn new(engine: Arc<DownloadEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ProtocolHandler for HttpHandler {
    fn protocol(&self) -> &'static str {
        "http"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: Arc<ProgressSink>,
        cancel: CancellationToken,
    ) -> TransferRecord {
        let connections = self.engine.config().max_connections_per_file;
        match self
            .engine
            .download(url, dest, Some(connections), &progress, &cancel)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                error!(url, error = %err, "HTTP download failed");
                TransferRecord::failed(url, self.protocol(), dest, err.to_string())
            }
        }
    }
}
