//! Readiness of ffmpeg for clip extraction.
//!
//! Clips are written with stream copy into the configured container, so an
//! ffmpeg build without that muxer fails every job. The check here finds the
//! binary and asks it which muxers it has before the first match ends.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::ToolCommand;
use crate::{Error, Result};

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// What ffmpeg reported about itself for one clip container.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionCheck {
    pub ffmpeg: PathBuf,
    /// First line of `ffmpeg -version`.
    pub version: Option<String>,
    /// Container extension from the clip settings.
    pub container: String,
    /// ffmpeg muxer that writes that container.
    pub muxer: String,
    pub muxer_supported: bool,
}

impl ExtractionCheck {
    /// One-line summary for logs and the `check-tools` command.
    pub fn describe(&self) -> String {
        let version = self.version.as_deref().unwrap_or("unknown version");
        if self.muxer_supported {
            format!("{} ({}) can write .{} clips", self.ffmpeg.display(), version, self.container)
        } else {
            format!(
                "{} ({}) has no '{}' muxer; .{} clips cannot be written",
                self.ffmpeg.display(),
                version,
                self.muxer,
                self.container
            )
        }
    }
}

/// Find the ffmpeg binary.
///
/// A configured path must exist; it is never silently replaced by whatever
/// ffmpeg is first on PATH.
pub fn locate_ffmpeg(configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(Error::tool_not_found(path.display().to_string())),
        None => which::which("ffmpeg").map_err(|_| Error::tool_not_found("ffmpeg")),
    }
}

/// ffmpeg's muxer name for a clip file extension.
pub fn muxer_for_container(container: &str) -> String {
    let ext = container.trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "mkv" => "matroska".to_string(),
        "ts" => "mpegts".to_string(),
        "wmv" => "asf".to_string(),
        _ => ext,
    }
}

/// Muxer names from the output of `ffmpeg -muxers`.
///
/// Rows follow a `--` separator as `<flags> <name[,alias]> <description>`;
/// only rows whose flags include `E` can write.
pub fn parse_muxers(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .skip_while(|line| line.trim() != "--")
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let names = parts.next()?;
            flags.contains('E').then_some(names)
        })
        .flat_map(|names| names.split(',').map(str::to_string))
        .collect()
}

/// Ask `ffmpeg` for its version and whether it can mux `container`.
///
/// # Errors
///
/// Fails if ffmpeg cannot be run at all; a missing muxer is reported in the
/// returned [`ExtractionCheck`] rather than as an error.
pub async fn check_extraction(ffmpeg: &Path, container: &str) -> Result<ExtractionCheck> {
    let version = ToolCommand::new(ffmpeg.to_path_buf())
        .args(["-hide_banner", "-version"])
        .timeout(CHECK_TIMEOUT)
        .execute()
        .await?
        .stdout
        .lines()
        .next()
        .map(str::to_string);

    let listing = ToolCommand::new(ffmpeg.to_path_buf())
        .args(["-hide_banner", "-muxers"])
        .timeout(CHECK_TIMEOUT)
        .execute()
        .await?
        .stdout;

    let muxer = muxer_for_container(container);
    let muxer_supported = parse_muxers(&listing).contains(&muxer);

    #[cfg(feature = "tracing")]
    tracing::debug!("ffmpeg {:?} muxer '{}' supported: {}", ffmpeg, muxer, muxer_supported);

    Ok(ExtractionCheck {
        ffmpeg: ffmpeg.to_path_buf(),
        version,
        container: container.trim_start_matches('.').to_string(),
        muxer,
        muxer_supported,
    })
}
