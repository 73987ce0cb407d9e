pub mod controller;
pub mod device;
pub mod render;
pub mod sink;

use std::sync::Arc;

use smash_collector_common::config::Config;

pub use controller::{ExportOutcome, SessionController, SessionError, SessionSnapshot};

/// Wire the configured camera, renderer and export directory into a fresh
/// controller.
pub fn build_controller(config: &Config) -> Result<SessionController, device::DeviceError> {
    let provider = device::from_config(&config.camera)?;
    let renderer = Arc::new(render::JpegRenderer::new(config.capture.jpeg_quality));
    let sink = Arc::new(sink::DirectorySink::new(&config.export.dir));
    Ok(SessionController::new(
        provider,
        renderer,
        sink,
        config.export.filename.clone(),
    ))
}
