use serde::{Deserialize, Serialize};

use crate::frame::{CapturedFrame, Label};

/// File name the dataset is delivered under.
pub const DEFAULT_EXPORT_FILENAME: &str = "smash-burger-data.json";

/// One exported frame/label pair.
///
/// JSON shape:
///   { "id": 1708300000000, "url": "data:image/jpeg;base64,...", "label": "perfect" }
/// Unlabeled frames carry `"label": null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub label: Option<Label>,
}

/// The whole exported dataset, in session order (newest first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportDocument {
    pub records: Vec<ExportRecord>,
}

impl ExportDocument {
    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a CapturedFrame>) -> Self {
        let records = frames
            .into_iter()
            .map(|frame| ExportRecord {
                id: frame.id().as_i64(),
                url: frame.image().data_uri().to_string(),
                label: frame.label(),
            })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pretty-printed JSON with two-space indentation.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ExportError> {
        serde_json::to_vec_pretty(self).map_err(ExportError::Serialize)
    }

    pub fn parse(data: &[u8]) -> Result<Self, ExportError> {
        serde_json::from_slice(data).map_err(ExportError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to serialize export document: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to parse export document: {0}")]
    Parse(serde_json::Error),
    #[error("failed to write export {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}
