//! # matchbox-av
//!
//! External media tool plumbing for match clips.
//!
//! This crate provides functionality for:
//! - Locating ffmpeg and confirming it can mux the clip container
//! - Running external tools with a timeout, killing them when abandoned
//! - Trimming a time window out of a recording without re-encoding
//! - Staging output files so they only appear under their final name once complete
//! - `{var}` substitution for operator-supplied command lines
//!
//! ## Features
//!
//! - `tracing` - Enable tracing support
//!
//! ## Example
//!
//! ```no_run
//! use matchbox_av::{FfmpegTrimmer, StagedOutput, TrimRequest, Trimmer};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> matchbox_av::Result<()> {
//! let trimmer = FfmpegTrimmer::discover(None)?;
//! let staged = StagedOutput::new(Path::new("/clips/EVENT/Q3 - Field 1.mp4"))?;
//! trimmer
//!     .trim(&TrimRequest {
//!         input: Path::new("/recordings/live.mkv").to_path_buf(),
//!         output: staged.path().to_path_buf(),
//!         start: Duration::from_secs(0),
//!         duration: Duration::from_secs(160),
//!     })
//!     .await?;
//! let final_path = staged.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod command;
mod error;
pub mod staging;
pub mod template;
pub mod tools;
pub mod trim;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use staging::StagedOutput;
pub use template::TemplateContext;
pub use tools::{check_extraction, locate_ffmpeg, muxer_for_container, ExtractionCheck};
pub use trim::{FfmpegTrimmer, TrimRequest, Trimmer};
