//! Clip jobs: window math, scheduling, and extraction.

mod extractor;
mod scheduler;

pub use extractor::{ActiveRecording, ClipExtractor, RecordingSource, StaticRecording, VideoExtractor};
pub use scheduler::{ClipScheduler, ResubmitError, SchedulerSettings};

use chrono::{DateTime, Utc};
use matchbox_common::{ClipId, FieldNumber};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::tracker::MatchEnded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// Wall-clock span to extract: the match plus its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ClipWindow {
    /// `[activated_at - pre, ended_at + post]`
    pub fn around(ended: &MatchEnded, pre: Duration, post: Duration) -> Self {
        let pre = chrono::Duration::from_std(pre).unwrap_or_else(|_| chrono::Duration::zero());
        let post = chrono::Duration::from_std(post).unwrap_or_else(|_| chrono::Duration::zero());
        let start = ended.activated_at - pre;
        let end = (ended.ended_at + post).max(start);
        Self { start, end }
    }

    /// Offsets of this window on a recording that started at `recording_start`.
    ///
    /// Both ends are clamped to the start of the recording, and the start
    /// never passes the end.
    pub fn relative_to(&self, recording_start: DateTime<Utc>) -> RecordingRange {
        let offset = |t: DateTime<Utc>| (t - recording_start).to_std().unwrap_or(Duration::ZERO);
        let start = offset(self.start);
        let end = offset(self.end).max(start);
        RecordingRange { start, end }
    }
}

/// A window expressed on a recording's own timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingRange {
    pub start: Duration,
    pub end: Duration,
}

impl RecordingRange {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// One extraction job per completed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipJob {
    pub id: ClipId,
    pub window: ClipWindow,
    pub status: ClipStatus,
    /// Attempts started so far.
    pub attempts: u32,
    /// Deterministic final path of the artifact.
    pub output_path: PathBuf,
    pub last_error: Option<String>,
    /// When the next attempt becomes due.
    pub due_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClipJob {
    pub fn field(&self) -> FieldNumber {
        self.id.field
    }

    pub fn match_label(&self) -> &str {
        &self.id.match_label
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ClipStatus::Done | ClipStatus::Failed)
    }
}

/// A completed, servable clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub match_label: String,
    pub field: FieldNumber,
}
