use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ImageReader;
use smash_collector_common::frame::EncodedImage;
use tracing::debug;

use crate::device::MediaStream;

/// Pixel surface that turns the current frame of a live stream into a
/// self-contained encoded image.
pub trait FrameRenderer: Send + Sync {
    fn snapshot(&self, stream: &dyn MediaStream) -> Result<EncodedImage, RenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("live feed has not produced a frame yet")]
    NoFrame,
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

/// Decodes the latest JPEG at its native resolution and re-encodes it as a
/// `data:image/jpeg;base64,...` URI.
pub struct JpegRenderer {
    quality: u8,
}

impl JpegRenderer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameRenderer for JpegRenderer {
    fn snapshot(&self, stream: &dyn MediaStream) -> Result<EncodedImage, RenderError> {
        let jpeg = stream.latest_frame().ok_or(RenderError::NoFrame)?;
        let image = encode_data_uri(&jpeg, self.quality)?;
        debug!(
            stream_id = stream.id(),
            width = image.width,
            height = image.height,
            bytes = image.data_uri().len(),
            "snapshot rendered"
        );
        Ok(image)
    }
}

/// Decode `frame` and re-encode it as an embeddable JPEG data URI.
pub fn encode_data_uri(frame: &[u8], quality: u8) -> Result<EncodedImage, RenderError> {
    let decoded = ImageReader::new(Cursor::new(frame))
        .with_guessed_format()
        .map_err(|e| RenderError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| RenderError::Decode(e.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    let rgb = decoded.to_rgb8();

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| RenderError::Encode(e.to_string()))?;

    let data_uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(&buf));
    Ok(EncodedImage::new(data_uri, width, height))
}
