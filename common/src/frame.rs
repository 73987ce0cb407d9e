use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Quality classification an operator assigns to a captured frame.
///
/// A frame that has not been labeled yet carries `None` rather than a
/// `Label`, so once labeled it can only move between these three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    UnderSmashed,
    Perfect,
    OverSmashed,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::UnderSmashed, Label::Perfect, Label::OverSmashed];

    /// Wire name used in exports and requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::UnderSmashed => "under_smashed",
            Label::Perfect => "perfect",
            Label::OverSmashed => "over_smashed",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| LabelError::Unknown(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("unknown label {0:?}, expected one of under_smashed, perfect, over_smashed")]
    Unknown(String),
}

/// Identifier of a captured frame: Unix millis at capture time, bumped so ids
/// stay strictly increasing when captures share a millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub i64);

impl FrameId {
    /// Allocate the id following `previous`, derived from `now_ms`.
    pub fn next(previous: Option<FrameId>, now_ms: i64) -> Self {
        match previous {
            Some(FrameId(prev)) if now_ms <= prev => FrameId(prev + 1),
            _ => FrameId(now_ms),
        }
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A self-contained encoded still image (a `data:` URI) plus the resolution it
/// was rendered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    data_uri: Arc<str>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn new(data_uri: impl Into<Arc<str>>, width: u32, height: u32) -> Self {
        Self {
            data_uri: data_uri.into(),
            width,
            height,
        }
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }
}

/// One still frame taken from the live feed, with its operator label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    id: FrameId,
    image: EncodedImage,
    label: Option<Label>,
}

impl CapturedFrame {
    /// Create an unlabeled frame.
    pub fn new(id: FrameId, image: EncodedImage) -> Self {
        Self {
            id,
            image,
            label: None,
        }
    }

    /// Rebuild a frame with a known label (used when reading exports back).
    pub fn with_label(id: FrameId, image: EncodedImage, label: Option<Label>) -> Self {
        Self { id, image, label }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn image(&self) -> &EncodedImage {
        &self.image
    }

    pub fn label(&self) -> Option<Label> {
        self.label
    }

    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }

    pub fn set_label(&mut self, label: Label) {
        self.label = Some(label);
    }
}
