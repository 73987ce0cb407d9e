pub mod feed;
pub mod mjpeg;
pub mod polling;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use smash_collector_common::config::CameraConfig;

pub use feed::LiveFeed;
pub use mjpeg::MjpegCamera;
pub use polling::PollingCamera;
pub use traits::{AcquireError, DeviceError, MediaDeviceProvider, MediaStream};

/// Build the camera provider selected by `camera.mode`.
pub fn from_config(config: &CameraConfig) -> Result<Arc<dyn MediaDeviceProvider>, DeviceError> {
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    match config.mode.as_str() {
        "mjpeg" => {
            let url = format!("{}?quality={}&fps={}", config.url, config.quality, config.fps);
            Ok(Arc::new(MjpegCamera::new(url, connect_timeout)?))
        }
        "polling" => {
            let url = format!(
                "{}?quality={}",
                config.url.replace("/stream", "/frame"),
                config.quality
            );
            let interval = Duration::from_secs_f64(1.0 / config.fps);
            Ok(Arc::new(PollingCamera::new(url, interval, connect_timeout)?))
        }
        other => Err(DeviceError::UnknownMode(other.to_string())),
    }
}
