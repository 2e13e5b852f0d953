use super::Recording;
use crate::error::{Error, Result};
use crate::storage;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Owner of the single current recording.
///
/// Failed saves and loads leave the slot untouched.
#[derive(Debug, Default)]
pub struct Session {
    current: Option<Recording>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Recording> {
        self.current.as_ref()
    }

    pub fn require_current(&self) -> Result<&Recording> {
        self.current.as_ref().ok_or(Error::NoRecording)
    }

    /// Make `recording` current, handing back the one it replaces
    pub fn install(&mut self, recording: Recording) -> Option<Recording> {
        self.warn_discard();
        self.current.replace(recording)
    }

    /// Whether the current recording exists only in memory
    pub fn has_unsaved(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|rec| rec.source_path().is_none())
    }

    /// Write the current recording to `path` and remember it as its location.
    /// Returns the canonical path written.
    pub fn save(&mut self, path: &Path) -> Result<PathBuf> {
        let recording = self.current.as_mut().ok_or(Error::NoRecording)?;
        let canonical = canonical_path(path)?;

        if recording.source_path() == Some(canonical.as_path()) && canonical.exists() {
            return Err(Error::AlreadyPersisted(canonical));
        }

        storage::save_recording(&canonical, recording)?;
        recording.set_source_path(canonical.clone());
        info!("Recording saved to {}", canonical.display());
        Ok(canonical)
    }

    /// Replace the current recording with the one stored at `path`
    pub fn load(&mut self, path: &Path) -> Result<&Recording> {
        if !path.is_file() {
            return Err(Error::RecordFileNotFound(path.to_path_buf()));
        }
        let canonical = fs::canonicalize(path)?;

        if self
            .current
            .as_ref()
            .is_some_and(|rec| rec.source_path() == Some(canonical.as_path()))
        {
            return Err(Error::AlreadyLoaded(canonical));
        }

        let mut recording = storage::load_recording(&canonical)?;
        recording.set_source_path(canonical.clone());
        self.warn_discard();
        info!("Recording loaded from {}", canonical.display());
        Ok(&*self.current.insert(recording))
    }

    fn warn_discard(&self) {
        if self.has_unsaved() {
            warn!("Discarding unsaved recording");
        }
    }
}

/// Absolute, symlink-free form of `path`. The file itself need not exist yet,
/// but its directory must.
pub fn canonical_path(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(fs::canonicalize(path)?);
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidArgument(format!("'{}' is not a file path", path.display())))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(fs::canonicalize(parent)?.join(file_name))
}
