//! VideoExtractor: staging, atomic rename, and error kinds.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{field, match_ended, FakeTrimmer, FixedRecording};
use matchbox::clips::{
    ClipExtractor, ClipJob, ClipStatus, ClipWindow, StaticRecording, VideoExtractor,
};
use matchbox::error::ExtractionErrorKind;
use matchbox_av::{TrimRequest, Trimmer};
use matchbox_common::ClipId;

fn job(output_dir: &Path, label: &str, start: i64, end: i64, recording_start: chrono::DateTime<Utc>) -> ClipJob {
    let ended = match_ended(1, label, recording_start, start, end);
    let id = ClipId::new(field(1), label);
    ClipJob {
        output_path: output_dir.join(format!("{} - Field 1.mp4", label)),
        id,
        window: ClipWindow::around(&ended, Duration::from_secs(10), Duration::from_secs(10)),
        status: ClipStatus::Running,
        attempts: 1,
        last_error: None,
        due_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn recording(dir: &Path) -> PathBuf {
    let path = dir.join("live.mkv");
    std::fs::write(&path, vec![0u8; 1024]).unwrap();
    path
}

fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Checks, while "ffmpeg" runs, that nothing is visible under the final name.
struct ObservingTrimmer {
    destination: PathBuf,
}

#[async_trait]
impl Trimmer for ObservingTrimmer {
    async fn trim(&self, request: &TrimRequest) -> matchbox_av::Result<()> {
        assert!(!self.destination.exists(), "final name visible mid-write");
        let staged_name = request.output.file_name().unwrap().to_string_lossy().to_string();
        assert!(staged_name.starts_with(".partial-"));
        assert!(staged_name.ends_with(".mp4"));
        assert_eq!(request.output.parent(), self.destination.parent());

        tokio::fs::write(&request.output, b"first half").await?;
        assert!(!self.destination.exists(), "final name visible mid-write");
        tokio::fs::write(&request.output, b"first half, second half").await?;
        Ok(())
    }
}

#[tokio::test]
async fn artifact_appears_only_after_rename() {
    let clips = tempfile::tempdir().unwrap();
    let recordings = tempfile::tempdir().unwrap();
    let started_at = Utc::now() - chrono::Duration::seconds(300);

    let job = job(clips.path(), "Q3", 100, 250, started_at);
    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: recording(recordings.path()),
            started_at,
        }),
        Arc::new(ObservingTrimmer {
            destination: job.output_path.clone(),
        }),
    );

    let artifact = extractor.execute(&job).await.unwrap();

    assert_eq!(artifact.path, job.output_path);
    assert_eq!(artifact.size_bytes, "first half, second half".len() as u64);
    assert_eq!(artifact.match_label, "Q3");
    assert_eq!(artifact.field, field(1));
    assert_eq!(dir_names(clips.path()), vec!["Q3 - Field 1.mp4"]);
}

#[tokio::test]
async fn window_is_converted_to_recording_offsets() {
    let clips = tempfile::tempdir().unwrap();
    let recordings = tempfile::tempdir().unwrap();
    let started_at = Utc::now() - chrono::Duration::seconds(600);
    let trimmer = Arc::new(FakeTrimmer::new());

    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: recording(recordings.path()),
            started_at,
        }),
        trimmer.clone(),
    );
    extractor
        .execute(&job(clips.path(), "Q1", 100, 250, started_at))
        .await
        .unwrap();

    let request = trimmer.requests.lock()[0].clone();
    assert_eq!(request.start, Duration::from_secs(90));
    assert_eq!(request.duration, Duration::from_secs(170));
}

#[tokio::test]
async fn missing_recording_is_source_missing() {
    let clips = tempfile::tempdir().unwrap();
    let trimmer = Arc::new(FakeTrimmer::new());
    let started_at = Utc::now() - chrono::Duration::seconds(300);

    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: clips.path().join("does-not-exist.mkv"),
            started_at,
        }),
        trimmer.clone(),
    );
    let err = extractor
        .execute(&job(clips.path(), "Q2", 100, 250, started_at))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ExtractionErrorKind::SourceMissing);
    assert_eq!(trimmer.calls(), 0);
}

#[tokio::test]
async fn window_before_recording_is_source_missing() {
    let clips = tempfile::tempdir().unwrap();
    let recordings = tempfile::tempdir().unwrap();
    let match_base = Utc::now() - chrono::Duration::seconds(1000);
    // Recording started long after the match ended.
    let started_at = Utc::now();

    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: recording(recordings.path()),
            started_at,
        }),
        Arc::new(FakeTrimmer::new()),
    );
    let err = extractor
        .execute(&job(clips.path(), "Q2", 0, 150, match_base))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ExtractionErrorKind::SourceMissing);
}

#[tokio::test]
async fn failed_trim_leaves_no_files() {
    let clips = tempfile::tempdir().unwrap();
    let recordings = tempfile::tempdir().unwrap();
    let started_at = Utc::now() - chrono::Duration::seconds(300);

    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: recording(recordings.path()),
            started_at,
        }),
        Arc::new(FakeTrimmer::failing(1)),
    );
    let err = extractor
        .execute(&job(clips.path(), "Q4", 100, 250, started_at))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ExtractionErrorKind::ProcessFailed);
    assert!(dir_names(clips.path()).is_empty());
}

/// Exits successfully without producing output.
struct SilentTrimmer;

#[async_trait]
impl Trimmer for SilentTrimmer {
    async fn trim(&self, _request: &TrimRequest) -> matchbox_av::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn empty_output_is_write_failure() {
    let clips = tempfile::tempdir().unwrap();
    let recordings = tempfile::tempdir().unwrap();
    let started_at = Utc::now() - chrono::Duration::seconds(300);

    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: recording(recordings.path()),
            started_at,
        }),
        Arc::new(SilentTrimmer),
    );
    let err = extractor
        .execute(&job(clips.path(), "Q5", 100, 250, started_at))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ExtractionErrorKind::WriteFailed);
    assert!(dir_names(clips.path()).is_empty());
}

#[tokio::test]
async fn existing_artifact_is_replaced() {
    let clips = tempfile::tempdir().unwrap();
    let recordings = tempfile::tempdir().unwrap();
    let started_at = Utc::now() - chrono::Duration::seconds(300);
    let job = job(clips.path(), "Q6", 100, 250, started_at);
    std::fs::write(&job.output_path, b"old clip").unwrap();

    let extractor = VideoExtractor::new(
        Arc::new(FixedRecording {
            path: recording(recordings.path()),
            started_at,
        }),
        Arc::new(FakeTrimmer::new()),
    );
    extractor.execute(&job).await.unwrap();

    let contents = std::fs::read_to_string(&job.output_path).unwrap();
    assert!(contents.starts_with("clip "));
    assert_eq!(dir_names(clips.path()), vec!["Q6 - Field 1.mp4"]);
}

#[tokio::test]
async fn static_recording_uses_file_timestamp() {
    let recordings = tempfile::tempdir().unwrap();
    let path = recording(recordings.path());
    let before = Utc::now() - chrono::Duration::seconds(5);

    let source = StaticRecording::new(path.clone());
    let active = matchbox::clips::RecordingSource::active_recording(&source, field(1))
        .await
        .unwrap();

    assert_eq!(active.path, path);
    assert!(active.started_at >= before);
    assert!(active.started_at <= Utc::now() + chrono::Duration::seconds(5));
}
