//! Staged output files with atomic finalization.
//!
//! A tool writes into a hidden file next to the destination; only a commit
//! renames it into place. Readers of the directory therefore see either the
//! previous artifact or the complete new one, never a partial write.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

/// Prefix of staging files. Hidden on unix and never served.
pub const STAGING_PREFIX: &str = ".partial-";

/// A hidden temporary file in the destination directory.
///
/// Dropping without [`StagedOutput::commit`] removes the temporary file.
///
/// # Example
///
/// ```no_run
/// use matchbox_av::StagedOutput;
/// use std::path::Path;
///
/// let staged = StagedOutput::new(Path::new("/clips/EVENT/Q3 - Field 1.mp4"))?;
/// std::fs::write(staged.path(), b"...")?;
/// staged.commit()?;
/// # Ok::<(), matchbox_av::Error>(())
/// ```
pub struct StagedOutput {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedOutput {
    /// Reserve a staging file for `destination`.
    ///
    /// The staging file keeps the destination's extension so tools that pick
    /// a muxer from the file name still work.
    pub fn new(destination: &Path) -> Result<Self> {
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Staging(format!("no parent directory: {:?}", destination)))?;

        let suffix = destination
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let temp = Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|e| Error::Staging(format!("failed to create staging file in {:?}: {}", dir, e)))?;

        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    /// Path the tool should write to.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Final destination path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Verify the staged file is non-empty and rename it over the destination.
    ///
    /// An existing file at the destination is replaced in one step.
    pub fn commit(self) -> Result<PathBuf> {
        let len = std::fs::metadata(self.temp.path())
            .map_err(|e| Error::Staging(format!("staged output vanished: {}", e)))?
            .len();
        if len == 0 {
            return Err(Error::Staging("staged output is empty".to_string()));
        }

        self.temp
            .persist(&self.destination)
            .map_err(|e| Error::Staging(format!("failed to move output to destination: {}", e.error)))?;

        Ok(self.destination)
    }

    /// Discard the staged output.
    pub fn discard(self) {
        // NamedTempFile removes itself on drop
        drop(self.temp);
    }
}
