use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::feed::{next_stream_id, LiveFeed};
use super::traits::{AcquireError, DeviceError, MediaDeviceProvider, MediaStream};

/// Polling fallback: the feed is a single-frame endpoint fetched at a fixed
/// interval instead of a multipart stream.
pub struct PollingCamera {
    frame_url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl PollingCamera {
    pub fn new(
        frame_url: String,
        interval: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(DeviceError::Client)?;
        Ok(Self {
            frame_url,
            interval,
            client,
        })
    }
}

async fn fetch_frame(client: &reqwest::Client, url: &str) -> Result<Bytes, AcquireError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| AcquireError::Unavailable(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(AcquireError::from_status(resp.status().as_u16()));
    }
    resp.bytes()
        .await
        .map_err(|e| AcquireError::Unavailable(e.to_string()))
}

#[async_trait]
impl MediaDeviceProvider for PollingCamera {
    async fn acquire(&self) -> Result<Box<dyn MediaStream>, AcquireError> {
        info!(url = self.frame_url, interval = ?self.interval, "opening polling camera");
        // A device that cannot serve one frame fails acquisition outright.
        let first = fetch_frame(&self.client, &self.frame_url).await?;

        let stream_id = next_stream_id();
        let (tx, rx) = watch::channel(Some(first));
        let task = tokio::spawn(poll_frames(
            self.client.clone(),
            self.frame_url.clone(),
            self.interval,
            tx,
            stream_id,
        ));
        Ok(Box::new(LiveFeed::new(stream_id, rx, task)))
    }

    fn name(&self) -> &str {
        "polling"
    }
}

async fn poll_frames(
    client: reqwest::Client,
    frame_url: String,
    interval: Duration,
    latest: watch::Sender<Option<Bytes>>,
    stream_id: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; acquire already fetched that frame.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if latest.is_closed() {
            debug!(stream_id, "feed has no readers left, stopping");
            return;
        }

        match fetch_frame(&client, &frame_url).await {
            Ok(frame) => {
                latest.send_replace(Some(frame));
            }
            Err(e) => {
                warn!(error = %e, stream_id, "failed to fetch camera frame");
            }
        }
    }
}
