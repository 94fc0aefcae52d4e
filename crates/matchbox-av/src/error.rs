//! Failures while cutting and writing clips.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a trim could not produce a clip.
///
/// The clip pipeline maps these onto its own retry categories: a missing
/// recording, a failed ffmpeg run, or a clip that could not be written.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// ffmpeg is not installed, or the configured path does not exist.
    #[error("{tool} not found; install ffmpeg or set tools.ffmpeg_path")]
    ToolNotFound { tool: String },

    /// ffmpeg could not be spawned or exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// ffmpeg outlived its deadline and was killed.
    #[error("{tool} killed after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// The recording to cut from is not on disk.
    #[error("recording not found: {}", path.display())]
    RecordingMissing { path: PathBuf },

    /// The requested window cannot produce a clip.
    #[error("invalid trim window: {0}")]
    InvalidWindow(String),

    /// The staged clip could not be created or moved into place.
    #[error("clip output: {0}")]
    Staging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn recording_missing(path: impl Into<PathBuf>) -> Self {
        Self::RecordingMissing { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_remedy() {
        let err = Error::tool_not_found("ffmpeg");
        assert_eq!(
            err.to_string(),
            "ffmpeg not found; install ffmpeg or set tools.ffmpeg_path"
        );

        let err = Error::recording_missing("/rec/live.mkv");
        assert_eq!(err.to_string(), "recording not found: /rec/live.mkv");

        let err = Error::Timeout {
            tool: "ffmpeg".to_string(),
            seconds: 600,
        };
        assert_eq!(err.to_string(), "ffmpeg killed after 600s");
    }
}
