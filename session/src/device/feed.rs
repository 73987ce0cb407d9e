use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::traits::MediaStream;

static STREAM_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_stream_id() -> u64 {
    STREAM_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A stream backed by a background task that publishes the latest JPEG frame.
///
/// Releasing aborts the task; the task itself also exits once the receiver
/// side is gone.
pub struct LiveFeed {
    id: u64,
    latest: watch::Receiver<Option<Bytes>>,
    task: Option<JoinHandle<()>>,
}

impl LiveFeed {
    pub(crate) fn new(id: u64, latest: watch::Receiver<Option<Bytes>>, task: JoinHandle<()>) -> Self {
        Self {
            id,
            latest,
            task: Some(task),
        }
    }
}

impl MediaStream for LiveFeed {
    fn id(&self) -> u64 {
        self.id
    }

    fn latest_frame(&self) -> Option<Bytes> {
        self.latest.borrow().clone()
    }

    fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn release_all(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(stream_id = self.id, "live feed released");
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.release_all();
    }
}
