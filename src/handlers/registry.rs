use std::sync::Arc;
use thiserror::Error;

use super::extended::{FtpHandler, HlsHandler, SftpHandler, WebDavHandler};
use super::http::HttpHandler;
use super::media::MediaHandler;
use super::torrent::TorrentHandler;
use super::traits::ProtocolHandler;
use crate::engine::DownloadEngine;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for URL: {0}")]
    NoHandler(String),
}

/// Ordered collection of capability-tagged handlers.
///
/// Registration order encodes priority: `resolve` is a linear scan
/// returning the first handler whose predicate matches. The set is
/// static, registered at construction, which keeps dispatch deterministic
/// and testable.
pub struct ProtocolRegistry {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.push(handler);
    }

    /// First handler, in registration order, whose predicate is true.
    /// No match is an error, never a default fallback.
    pub fn resolve(&self, url: &str) -> Result<Arc<dyn ProtocolHandler>, RegistryError> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(url))
            .cloned()
            .ok_or_else(|| RegistryError::NoHandler(url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Built-in handlers. The more specific predicates (magnet links,
    /// known media hosts, playlist extensions) come before the
    /// engine-backed HTTP handler, which would otherwise shadow every
    /// https URL. The non-HTTP schemes (ftp, sftp, dav) cannot collide
    /// with it but keep the same specific-first order.
    pub fn with_defaults(engine: Arc<DownloadEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TorrentHandler::new()));
        registry.register(Arc::new(MediaHandler::new()));
        registry.register(Arc::new(HlsHandler::new()));
        registry.register(Arc::new(WebDavHandler::new()));
        registry.register(Arc::new(FtpHandler::new()));
        registry.register(Arc::new(SftpHandler::new()));
        registry.register(Arc::new(HttpHandler::new(engine)));
        registry
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
