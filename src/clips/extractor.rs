use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matchbox_av::{StagedOutput, TrimRequest, Trimmer};
use matchbox_common::FieldNumber;
use std::path::PathBuf;
use std::sync::Arc;

use super::{ClipArtifact, ClipJob};
use crate::error::ExtractionError;

/// The recording a clip is cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRecording {
    pub path: PathBuf,
    /// Wall-clock instant of the recording's first frame.
    pub started_at: DateTime<Utc>,
}

/// Locates the recording that covers a field, at the time of extraction.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    async fn active_recording(&self, field: FieldNumber) -> Result<ActiveRecording, ExtractionError>;
}

/// A recording pinned by configuration.
///
/// The start instant comes from the file's creation time, or its
/// modification time where creation time is unavailable.
pub struct StaticRecording {
    path: PathBuf,
}

impl StaticRecording {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RecordingSource for StaticRecording {
    async fn active_recording(&self, _field: FieldNumber) -> Result<ActiveRecording, ExtractionError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            ExtractionError::source_missing(format!("recording {:?} unavailable: {}", self.path, e))
        })?;
        let started = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|e| ExtractionError::source_missing(format!("no timestamp on {:?}: {}", self.path, e)))?;

        Ok(ActiveRecording {
            path: self.path.clone(),
            started_at: DateTime::<Utc>::from(started),
        })
    }
}

/// Runs one extraction attempt for a job.
#[async_trait]
pub trait ClipExtractor: Send + Sync {
    async fn execute(&self, job: &ClipJob) -> Result<ClipArtifact, ExtractionError>;
}

/// Cuts the job's window out of the active recording.
///
/// Output is staged under a hidden name next to the final path and renamed
/// into place only once the trimmer exits successfully and wrote data.
pub struct VideoExtractor {
    source: Arc<dyn RecordingSource>,
    trimmer: Arc<dyn Trimmer>,
}

impl VideoExtractor {
    pub fn new(source: Arc<dyn RecordingSource>, trimmer: Arc<dyn Trimmer>) -> Self {
        Self { source, trimmer }
    }
}

#[async_trait]
impl ClipExtractor for VideoExtractor {
    async fn execute(&self, job: &ClipJob) -> Result<ClipArtifact, ExtractionError> {
        let recording = self.source.active_recording(job.field()).await?;
        if !recording.path.is_file() {
            return Err(ExtractionError::source_missing(format!(
                "recording file {:?} does not exist",
                recording.path
            )));
        }

        let range = job.window.relative_to(recording.started_at);
        if range.duration().is_zero() {
            return Err(ExtractionError::source_missing(format!(
                "clip window lies before the recording started at {}",
                recording.started_at
            )));
        }

        if let Some(dir) = job.output_path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ExtractionError::write_failed(format!("failed to create {:?}: {}", dir, e))
            })?;
        }

        let staged = StagedOutput::new(&job.output_path)?;
        let request = TrimRequest {
            input: recording.path.clone(),
            output: staged.path().to_path_buf(),
            start: range.start,
            duration: range.duration(),
        };

        tracing::debug!(
            job = %job.id,
            input = ?request.input,
            start = range.start.as_secs_f64(),
            duration = range.duration().as_secs_f64(),
            "Extracting clip"
        );
        self.trimmer.trim(&request).await?;

        let path = staged.commit()?;
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ExtractionError::write_failed(format!("artifact vanished: {e}")))?
            .len();

        Ok(ClipArtifact {
            path,
            size_bytes,
            match_label: job.id.match_label.clone(),
            field: job.id.field,
        })
    }
}
