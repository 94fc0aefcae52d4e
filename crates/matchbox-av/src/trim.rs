//! Cutting a time window out of a recording.
//!
//! Streams are copied, not re-encoded, so a clip of a two and a half minute
//! match takes seconds even while the recording keeps growing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::tools::{check_extraction, locate_ffmpeg, ExtractionCheck};
use crate::{Error, Result};

/// One trim job: copy `[start, start + duration)` of `input` into `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Offset into the input's timeline.
    pub start: Duration,
    pub duration: Duration,
}

/// Something that can cut a window out of a media file.
#[async_trait]
pub trait Trimmer: Send + Sync {
    /// Write the requested window to `request.output`.
    ///
    /// Returns only after the output file is fully written.
    async fn trim(&self, request: &TrimRequest) -> Result<()>;
}

/// [`Trimmer`] backed by the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTrimmer {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegTrimmer {
    /// Use a specific ffmpeg binary.
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self {
            ffmpeg,
            timeout: Duration::from_secs(600),
        }
    }

    /// Use the configured ffmpeg, or the one on PATH when none is configured.
    pub fn discover(configured: Option<&Path>) -> Result<Self> {
        Ok(Self::new(locate_ffmpeg(configured)?))
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Confirm this ffmpeg can write clips into `container`.
    pub async fn check_container(&self, container: &str) -> Result<ExtractionCheck> {
        check_extraction(&self.ffmpeg, container).await
    }

    /// Kill ffmpeg if it runs longer than this.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the ffmpeg invocation for a request.
    pub fn command(&self, request: &TrimRequest) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(["-hide_banner", "-nostdin", "-y"])
            .arg("-ss")
            .arg(format_seconds(request.start))
            .arg("-i")
            .arg(request.input.to_string_lossy())
            .arg("-t")
            .arg(format_seconds(request.duration))
            .args(["-map", "0", "-c", "copy", "-avoid_negative_ts", "make_zero"])
            .arg(request.output.to_string_lossy())
            .timeout(self.timeout);
        cmd
    }
}

#[async_trait]
impl Trimmer for FfmpegTrimmer {
    async fn trim(&self, request: &TrimRequest) -> Result<()> {
        if !request.input.exists() {
            return Err(Error::recording_missing(&request.input));
        }
        if request.duration.is_zero() {
            return Err(Error::InvalidWindow("trim duration is zero".to_string()));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Trimming {:?}: {:.1}s + {:.1}s -> {:?}",
            request.input,
            request.start.as_secs_f64(),
            request.duration.as_secs_f64(),
            request.output
        );

        self.command(request).execute().await?;
        Ok(())
    }
}

/// Seconds with millisecond precision, the form ffmpeg's time parser takes.
fn format_seconds(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}
