use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::types::TransferRecord;
use crate::engine::ProgressSink;

/// A capability implementation bound to one or more URL patterns.
///
/// `download` never fails out: every outcome, including cancellation and
/// a missing capability, ends in a terminal [`TransferRecord`] with an
/// explicit status and, on failure, a non-empty error message.
impl std::fmt::Debug for dyn ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("protocol", &self.protocol())
            .finish()
    }
}

#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Protocol tag stamped on transfers serviced by this handler.
    fn protocol(&self) -> &'static str;

    /// Whether this handler services the given URL.
    fn can_handle(&self, url: &str) -> bool;

    /// Run the transfer to completion and return the terminal record.
    ///
    /// Handlers that stream bytes bind `progress` so the caller can
    /// observe the transfer while it runs; opaque capability slots
    /// leave it unbound.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: Arc<ProgressSink>,
        cancel: CancellationToken,
    ) -> TransferRecord;
}
