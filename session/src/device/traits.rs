use async_trait::async_trait;
use bytes::Bytes;

/// Source of live camera streams.
///
/// `acquire` is the only suspending operation in a capture session; it either
/// hands back a live stream or explains why the camera could not be opened.
#[async_trait]
pub trait MediaDeviceProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn MediaStream>, AcquireError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// A live, revocable handle to camera output.
///
/// Implementations must release their tracks on `Drop` as well, so a stream
/// that is dropped without `release_all` still frees the device.
pub trait MediaStream: Send + Sync {
    /// Identity of this stream, unique per acquisition.
    fn id(&self) -> u64;

    /// Most recent encoded frame (JPEG) delivered by the feed, if any.
    fn latest_frame(&self) -> Option<Bytes>;

    /// Returns `false` once released or once the underlying feed has ended.
    fn is_live(&self) -> bool;

    /// Stop every track of the stream. Idempotent.
    fn release_all(&mut self);
}

/// Why a camera stream could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("camera access denied")]
    Denied,
    #[error("no camera device found")]
    NotFound,
    #[error("camera is busy")]
    Busy,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

impl AcquireError {
    /// Classify a non-success HTTP status returned by a camera endpoint.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => AcquireError::Denied,
            404 => AcquireError::NotFound,
            409 | 423 | 503 => AcquireError::Busy,
            other => AcquireError::Unavailable(format!("HTTP status {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown camera mode {0:?}, expected 'mjpeg' or 'polling'")]
    UnknownMode(String),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}
