//! Range-bounded fetch of one chunk into the shared output file.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::FetchError;
use super::planner::ChunkRange;
use super::progress::TransferProgress;

/// Fetches exactly one planned byte range of a resource.
///
/// Each fetcher opens its own handle on the pre-sized destination and
/// writes sequentially from the range's start offset. Ranges are disjoint
/// by construction, so concurrent fetchers never contend for offsets and
/// no write lock exists. Retrying a range restarts it from the same
/// offset, which keeps retries idempotent.
pub struct RangeFetcher {
    client: Client,
    url: String,
    range: ChunkRange,
    max_retries: u32,
    write_buffer: usize,
}

impl RangeFetcher {
    pub fn new(
        client: Client,
        url: String,
        range: ChunkRange,
        max_retries: u32,
        write_buffer: usize,
    ) -> Self {
        Self {
            client,
            url,
            range,
            max_retries,
            write_buffer,
        }
    }

    /// Fetch the range, retrying transient failures up to `max_retries`
    /// times after the initial attempt, with exponential backoff (1s,
    /// 2s, 4s, ...). Returns the exact byte count written.
    pub async fn fetch(
        &self,
        dest: &Path,
        progress: &TransferProgress,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        if self.range.is_empty() {
            progress.record(self.range.index, 0);
            return Ok(0);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            match self.fetch_once(dest, progress, cancel).await {
                Ok(written) => {
                    if attempt > 1 {
                        debug!(
                            url = %self.url,
                            chunk = self.range.index,
                            attempt,
                            "chunk fetch succeeded after retry"
                        );
                    }
                    return Ok(written);
                }
                Err(err) if err.is_transient() && attempt <= self.max_retries => {
                    let backoff = Duration::from_secs(2u64.pow(attempt - 1));
                    warn!(
                        url = %self.url,
                        chunk = self.range.index,
                        attempt,
                        error = %err,
                        "chunk fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => {
                    warn!(
                        url = %self.url,
                        chunk = self.range.index,
                        attempt,
                        error = %err,
                        "chunk fetch failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        dest: &Path,
        progress: &TransferProgress,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let range = &self.range;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            sent = self
                .client
                .get(&self.url)
                .header(
                    header::RANGE,
                    format!("bytes={}-{}", range.start, range.end()),
                )
                .send() => sent.map_err(classify)?,
        };

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!("HTTP {status}")));
        }
        // A 200 means the server ignored the Range header and is sending
        // the whole body. That only lines up with a range starting at
        // offset zero; the overlong-body guard below rejects it whenever
        // the plan holds more than this one chunk.
        if status != StatusCode::PARTIAL_CONTENT
            && !(status == StatusCode::OK && range.start == 0)
        {
            return Err(FetchError::Permanent(format!(
                "unexpected status {status} for ranged request"
            )));
        }

        let file = OpenOptions::new()
            .write(true)
            .open(dest)
            .await
            .map_err(|e| FetchError::Permanent(format!("open output file: {e}")))?;
        let mut sink = BufWriter::with_capacity(self.write_buffer, file);
        sink.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| FetchError::Permanent(format!("seek output file: {e}")))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                next = stream.next() => match next {
                    Some(bytes) => bytes.map_err(classify)?,
                    None => break,
                },
            };

            written += chunk.len() as u64;
            if written > range.len {
                return Err(FetchError::Permanent(format!(
                    "server sent {written} bytes for a {}-byte range",
                    range.len
                )));
            }

            sink.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Permanent(format!("write output file: {e}")))?;
            progress.record(range.index, written);
        }

        sink.flush()
            .await
            .map_err(|e| FetchError::Permanent(format!("flush output file: {e}")))?;

        if written < range.len {
            // A clean end-of-stream short of the range is indistinguishable
            // from a mid-connection reset; retry the whole range.
            return Err(FetchError::Transient(format!(
                "range response truncated at {written} of {} bytes",
                range.len
            )));
        }

        Ok(written)
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_redirect() || err.is_builder() || err.is_decode() {
        FetchError::Permanent(err.to_string())
    } else {
        // Timeouts, connect failures, and body resets are retry candidates.
        FetchError::Transient(err.to_string())
    }
}
