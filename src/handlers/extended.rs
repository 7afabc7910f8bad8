//! Remote-filesystem and stream capability slots: FTP, SFTP, WebDAV,
//! and HLS playlists.
//!
//! Same contract as the torrent and media slots: real predicates, and an
//! explicit failed record until the transport backend is wired in. The
//! HLS predicate matches on the `.m3u8` playlist extension; probing the
//! body for an `#EXTM3U` signature would make `can_handle` a network
//! call, and dispatch predicates stay pure here.

use async_trait::async_trait;
use reqwest::Url;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::traits::ProtocolHandler;
use super::types::TransferRecord;
use crate::engine::ProgressSink;

pub struct FtpHandler;

impl FtpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FtpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for FtpHandler {
    fn protocol(&self) -> &'static str {
        "ftp"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("ftp://")
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        _progress: Arc<ProgressSink>,
        _cancel: CancellationToken,
    ) -> TransferRecord {
        warn!(url, "FTP transport requested but not available");
        TransferRecord::failed(
            url,
            self.protocol(),
            dest,
            "FTP transport is not available in this build",
        )
    }
}

pub struct SftpHandler;

impl SftpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SftpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for SftpHandler {
    fn protocol(&self) -> &'static str {
        "sftp"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("sftp://") || url.starts_with("ssh://")
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        _progress: Arc<ProgressSink>,
        _cancel: CancellationToken,
    ) -> TransferRecord {
        warn!(url, "SFTP transport requested but not available");
        TransferRecord::failed(
            url,
            self.protocol(),
            dest,
            "SFTP transport is not available in this build",
        )
    }
}

pub struct WebDavHandler;

impl WebDavHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebDavHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for WebDavHandler {
    fn protocol(&self) -> &'static str {
        "webdav"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("webdav://") || url.starts_with("dav://")
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        _progress: Arc<ProgressSink>,
        _cancel: CancellationToken,
    ) -> TransferRecord {
        warn!(url, "WebDAV transport requested but not available");
        TransferRecord::failed(
            url,
            self.protocol(),
            dest,
            "WebDAV transport is not available in this build",
        )
    }
}

pub struct HlsHandler;

impl HlsHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HlsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for HlsHandler {
    fn protocol(&self) -> &'static str {
        "m3u8"
    }

    /// Matches playlist URLs by path extension, ignoring the query
    /// string.
    fn can_handle(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        parsed.path().to_ascii_lowercase().ends_with(".m3u8")
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        _progress: Arc<ProgressSink>,
        _cancel: CancellationToken,
    ) -> TransferRecord {
        warn!(url, "HLS segment assembly requested but not available");
        TransferRecord::failed(
            url,
            self.protocol(),
            dest,
            "HLS segment assembly is not available in this build",
        )
    }
}
