use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::feed::{next_stream_id, LiveFeed};
use super::traits::{AcquireError, DeviceError, MediaDeviceProvider, MediaStream};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Largest part (headers or JPEG) buffered before the parser gives up on it.
const MAX_PART_LEN: usize = 8 * 1024 * 1024;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` MJPEG body.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one network chunk; returns every JPEG completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        if self.buffer.len() > MAX_PART_LEN {
                            self.resync();
                        }
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        if self.buffer.len() > MAX_PART_LEN {
                            self.resync();
                            break;
                        }
                        // Avoid re-scanning old data on the next chunk
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };

                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let mut part = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    part.truncate(end);
                    if !part.is_empty() {
                        frames.push(part.freeze());
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        frames
    }

    /// Drop an oversized part, keeping only a tail that may hold the start of
    /// the next boundary.
    fn resync(&mut self) {
        warn!(
            buffered = self.buffer.len(),
            "MJPEG part without boundary exceeds {MAX_PART_LEN} bytes, resyncing"
        );
        let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
        self.jpeg_start = 0;
        self.state = ParseState::SeekingBoundary;
    }
}

/// Camera reached over an HTTP MJPEG endpoint.
pub struct MjpegCamera {
    url: String,
    client: reqwest::Client,
}

impl MjpegCamera {
    pub fn new(url: String, connect_timeout: Duration) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(DeviceError::Client)?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl MediaDeviceProvider for MjpegCamera {
    async fn acquire(&self) -> Result<Box<dyn MediaStream>, AcquireError> {
        info!(url = self.url, "connecting to MJPEG stream");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AcquireError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AcquireError::from_status(response.status().as_u16()));
        }

        let stream_id = next_stream_id();
        info!(status = %response.status(), stream_id, "connected to MJPEG stream");

        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(pump_frames(response, tx, stream_id));
        Ok(Box::new(LiveFeed::new(stream_id, rx, task)))
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

async fn pump_frames(
    response: reqwest::Response,
    latest: watch::Sender<Option<Bytes>>,
    stream_id: u64,
) {
    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();
    let mut total: u64 = 0;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, stream_id, "MJPEG stream error, feed ended");
                return;
            }
        };

        for frame in parser.push(&chunk) {
            total += 1;
            if total % 100 == 0 {
                debug!(stream_id, total, bytes = frame.len(), "frames received");
            }
            latest.send_replace(Some(frame));
        }

        if latest.is_closed() {
            debug!(stream_id, "feed has no readers left, stopping");
            return;
        }
    }

    info!(stream_id, total, "MJPEG stream ended");
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
