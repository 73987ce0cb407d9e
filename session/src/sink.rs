use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use smash_collector_common::export::ExportError;
use tracing::{debug, info, warn};

/// Destination for exported documents.
pub trait ExportSink: Send + Sync {
    /// Deliver `document` under `filename`; returns where it landed.
    fn save(&self, document: &[u8], filename: &str) -> Result<PathBuf, ExportError>;
}

/// Writes exports into a directory on local disk.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExportSink for DirectorySink {
    fn save(&self, document: &[u8], filename: &str) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| write_error(&self.dir, e))?;

        let mut pending = PendingExport::create(&self.dir, filename)?;
        pending.write_all(document)?;
        let path = pending.persist()?;

        info!(path = path.display().to_string(), bytes = document.len(), "export saved");
        Ok(path)
    }
}

/// A scoped temporary export file.
///
/// The document is written next to its final location as `.{name}.partial`
/// and only renamed into place by `persist`. Dropping the handle before that
/// removes the temp file, so a failed export leaves nothing behind.
struct PendingExport {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    persisted: bool,
}

impl PendingExport {
    fn create(dir: &Path, filename: &str) -> Result<Self, ExportError> {
        let temp_path = dir.join(format!(".{filename}.partial"));
        let final_path = dir.join(filename);
        let file = File::create(&temp_path).map_err(|e| write_error(&temp_path, e))?;
        debug!(path = temp_path.display().to_string(), "export handle opened");
        Ok(Self {
            file: Some(file),
            temp_path,
            final_path,
            persisted: false,
        })
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ExportError> {
        let Some(file) = self.file.as_mut() else {
            return Err(write_error(
                &self.temp_path,
                std::io::Error::other("export handle already closed"),
            ));
        };
        file.write_all(data)
            .and_then(|()| file.sync_all())
            .map_err(|e| write_error(&self.temp_path, e))
    }

    fn persist(mut self) -> Result<PathBuf, ExportError> {
        // Close before rename so the handle is released on every platform.
        drop(self.file.take());
        std::fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| write_error(&self.final_path, e))?;
        self.persisted = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for PendingExport {
    fn drop(&mut self) {
        drop(self.file.take());
        if self.persisted {
            return;
        }
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = self.temp_path.display().to_string(), "discarded partial export"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = self.temp_path.display().to_string(),
                error = %e,
                "failed to remove partial export"
            ),
        }
    }
}

fn write_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Write {
        path: path.display().to_string(),
        source,
    }
}
