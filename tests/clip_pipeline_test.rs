//! End-to-end clip pipeline: tracker transitions through the scheduler and
//! extractor to a servable artifact, with a fake trimmer standing in for
//! ffmpeg.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{fast_settings, field, match_ended, wait_until, FakeTrimmer, FixedRecording};
use matchbox::catalog::scan_artifacts;
use matchbox::clips::{ClipScheduler, ClipStatus, ResubmitError, VideoExtractor};
use matchbox::events::{FieldEvent, FieldEventKind};
use matchbox::state::{AppEvent, StatusBoard};
use matchbox::tracker::MatchStateTracker;
use matchbox_common::ClipId;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Pipeline {
    scheduler: ClipScheduler,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    trimmer: Arc<FakeTrimmer>,
    status: StatusBoard,
    clips: TempDir,
    _recordings: TempDir,
    recording_start: DateTime<Utc>,
}

impl Pipeline {
    /// Recording started `recording_age` seconds ago.
    fn start(trimmer: FakeTrimmer, max_attempts: u32, recording_age: i64) -> Self {
        let clips = tempfile::tempdir().unwrap();
        let recordings = tempfile::tempdir().unwrap();
        let recording_path = recordings.path().join("live.mkv");
        std::fs::write(&recording_path, b"recording").unwrap();
        let recording_start = Utc::now() - chrono::Duration::seconds(recording_age);

        let trimmer = Arc::new(trimmer);
        let extractor = Arc::new(VideoExtractor::new(
            Arc::new(FixedRecording {
                path: recording_path,
                started_at: recording_start,
            }),
            trimmer.clone(),
        ));

        let status = StatusBoard::new("TESTEVT", [field(1), field(2)]);
        let cancel = CancellationToken::new();
        let (scheduler, handle) = ClipScheduler::spawn(
            extractor,
            fast_settings(clips.path(), max_attempts),
            status.clone(),
            cancel.clone(),
        );

        Self {
            scheduler,
            handle,
            cancel,
            trimmer,
            status,
            clips,
            _recordings: recordings,
            recording_start,
        }
    }

    async fn wait_for_status(&self, id: &ClipId, status: ClipStatus) -> bool {
        wait_until(WAIT, || {
            self.scheduler
                .job(id)
                .is_some_and(|job| job.status == status)
        })
        .await
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap();
    }
}

fn event(field_no: u32, kind: FieldEventKind, label: &str, received_at: DateTime<Utc>) -> FieldEvent {
    FieldEvent {
        field: field(field_no),
        kind,
        match_label: label.to_string(),
        received_at,
        raw_timestamp: None,
    }
}

#[tokio::test]
async fn completed_match_produces_one_artifact() {
    // Field 1 activates at t=0 and ends at t=150; the recording began at t=0.
    let pipeline = Pipeline::start(FakeTrimmer::new(), 3, 150);
    let t0 = pipeline.recording_start;

    let mut tracker = MatchStateTracker::with_field_count(2);
    tracker.subscribe(Arc::new(pipeline.status.clone()));
    tracker.subscribe(Arc::new(pipeline.scheduler.clone()));

    tracker
        .on_event(&event(1, FieldEventKind::MatchStart, "Q3", t0))
        .unwrap();
    tracker
        .on_event(&event(1, FieldEventKind::MatchEnd, "Q3", t0 + chrono::Duration::seconds(150)))
        .unwrap();

    let id = ClipId::new(field(1), "Q3");
    let job = pipeline.scheduler.job(&id).expect("job scheduled synchronously");
    assert_eq!(job.window.start, t0 - chrono::Duration::seconds(10));

    assert!(pipeline.wait_for_status(&id, ClipStatus::Done).await);

    let requests = pipeline.trimmer.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    // [-10, 150.02] clamped to the start of the recording.
    assert_eq!(requests[0].start, Duration::ZERO);
    assert_eq!(requests[0].duration, Duration::from_millis(150_020));

    let job = pipeline.scheduler.job(&id).unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(job.output_path, pipeline.clips.path().join("Q3 - Field 1.mp4"));

    let artifacts = scan_artifacts(pipeline.clips.path()).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "Q3 - Field 1.mp4");

    assert!(wait_until(WAIT, || pipeline.status.snapshot().artifact_count == 1).await);
    assert_eq!(pipeline.status.snapshot().jobs.done, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn duplicate_match_end_creates_one_job() {
    let pipeline = Pipeline::start(FakeTrimmer::new(), 3, 200);
    let base = pipeline.recording_start;

    let ended = match_ended(2, "Q7", base, 10, 160);
    assert!(pipeline.scheduler.on_match_ended(&ended));
    assert!(!pipeline.scheduler.on_match_ended(&ended));

    // The tracker also suppresses a MATCH_END for an idle field.
    let mut tracker = MatchStateTracker::with_field_count(2);
    tracker.subscribe(Arc::new(pipeline.scheduler.clone()));
    let transitions = tracker
        .on_event(&event(2, FieldEventKind::MatchEnd, "Q7", Utc::now()))
        .unwrap();
    assert!(transitions.is_empty());

    assert_eq!(pipeline.scheduler.jobs().len(), 1);

    let id = ClipId::new(field(2), "Q7");
    assert!(pipeline.wait_for_status(&id, ClipStatus::Done).await);
    assert_eq!(pipeline.trimmer.calls(), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn aborted_match_schedules_nothing() {
    let pipeline = Pipeline::start(FakeTrimmer::new(), 3, 100);
    let t0 = pipeline.recording_start;

    let mut tracker = MatchStateTracker::with_field_count(2);
    tracker.subscribe(Arc::new(pipeline.scheduler.clone()));
    tracker
        .on_event(&event(1, FieldEventKind::MatchStart, "Q4", t0))
        .unwrap();
    tracker
        .on_event(&event(1, FieldEventKind::MatchAbort, "Q4", t0 + chrono::Duration::seconds(30)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pipeline.scheduler.jobs().is_empty());
    assert_eq!(pipeline.trimmer.calls(), 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn failures_retry_then_succeed() {
    let pipeline = Pipeline::start(FakeTrimmer::failing(1), 3, 200);
    let mut events = pipeline.status.subscribe();

    let ended = match_ended(1, "Q5", pipeline.recording_start, 20, 170);
    pipeline.scheduler.on_match_ended(&ended);

    let id = ClipId::new(field(1), "Q5");
    assert!(pipeline.wait_for_status(&id, ClipStatus::Done).await);
    assert_eq!(pipeline.scheduler.job(&id).unwrap().attempts, 2);
    assert_eq!(pipeline.trimmer.calls(), 2);

    let mut saw_retry = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, AppEvent::ClipRetrying { attempt: 1, .. }) {
            saw_retry = true;
        }
    }
    assert!(saw_retry);

    pipeline.stop().await;
}

#[tokio::test]
async fn exhausted_retries_mark_job_failed() {
    let pipeline = Pipeline::start(FakeTrimmer::failing(10), 2, 200);

    let ended = match_ended(1, "Q6", pipeline.recording_start, 20, 170);
    pipeline.scheduler.on_match_ended(&ended);

    let id = ClipId::new(field(1), "Q6");
    assert!(pipeline.wait_for_status(&id, ClipStatus::Failed).await);

    let job = pipeline.scheduler.job(&id).unwrap();
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.unwrap().contains("ffmpeg"));
    assert_eq!(pipeline.trimmer.calls(), 2);

    let snapshot = pipeline.status.snapshot();
    assert_eq!(snapshot.jobs.failed, 1);
    assert!(snapshot.last_extraction_error.is_some());

    // Nothing partial is left behind under a public name.
    assert!(scan_artifacts(pipeline.clips.path()).await.unwrap().is_empty());

    pipeline.stop().await;
}

#[tokio::test]
async fn resubmission_overwrites_the_same_artifact() {
    let pipeline = Pipeline::start(FakeTrimmer::new(), 3, 200);
    let id = ClipId::new(field(1), "Q8");

    assert!(matches!(
        pipeline.scheduler.resubmit(&id),
        Err(ResubmitError::UnknownJob(_))
    ));

    pipeline
        .scheduler
        .on_match_ended(&match_ended(1, "Q8", pipeline.recording_start, 20, 170));
    assert!(pipeline.wait_for_status(&id, ClipStatus::Done).await);

    pipeline.scheduler.resubmit(&id).unwrap();
    assert!(wait_until(WAIT, || pipeline.trimmer.calls() == 2).await);
    assert!(pipeline.wait_for_status(&id, ClipStatus::Done).await);

    let artifacts = scan_artifacts(pipeline.clips.path()).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    let contents =
        std::fs::read_to_string(pipeline.clips.path().join("Q8 - Field 1.mp4")).unwrap();
    assert!(contents.ends_with("call 2"));

    pipeline.stop().await;
}

#[tokio::test]
async fn resubmitting_a_running_job_is_refused() {
    let pipeline = Pipeline::start(FakeTrimmer::slow(Duration::from_millis(400)), 3, 200);
    let id = ClipId::new(field(2), "Q2");

    pipeline
        .scheduler
        .on_match_ended(&match_ended(2, "Q2", pipeline.recording_start, 20, 170));
    assert!(pipeline.wait_for_status(&id, ClipStatus::Running).await);

    assert!(matches!(
        pipeline.scheduler.resubmit(&id),
        Err(ResubmitError::InProgress(_))
    ));

    assert!(pipeline.wait_for_status(&id, ClipStatus::Done).await);
    pipeline.stop().await;
}

#[tokio::test]
async fn shutdown_kills_extractions_after_grace() {
    let pipeline = Pipeline::start(FakeTrimmer::slow(Duration::from_secs(30)), 3, 200);
    let id = ClipId::new(field(1), "Q11");

    pipeline
        .scheduler
        .on_match_ended(&match_ended(1, "Q11", pipeline.recording_start, 20, 170));
    assert!(pipeline.wait_for_status(&id, ClipStatus::Running).await);

    let mut events = pipeline.status.subscribe();
    let (scheduler, status) = (pipeline.scheduler.clone(), pipeline.status.clone());
    let clips = pipeline.clips.path().to_path_buf();
    let started = std::time::Instant::now();
    pipeline.cancel.cancel();
    pipeline.handle.await.unwrap();

    // Grace period is 500ms in the fast settings.
    assert!(started.elapsed() < Duration::from_secs(5));
    let job = scheduler.job(&id).unwrap();
    assert_eq!(job.status, ClipStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("interrupted by shutdown"));
    assert!(scan_artifacts(&clips).await.unwrap().is_empty());

    assert!(failed_labels(&mut events).contains(&"Q11".to_string()));
    let snapshot = status.snapshot();
    assert_eq!(snapshot.jobs.running, 0);
    assert_eq!(snapshot.jobs.failed, 1);
    assert!(snapshot
        .last_extraction_error
        .unwrap()
        .message
        .contains("interrupted by shutdown"));
}

/// Labels of every `ClipFailed` event received so far.
fn failed_labels(events: &mut tokio::sync::broadcast::Receiver<AppEvent>) -> Vec<String> {
    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let AppEvent::ClipFailed { match_label, .. } = event {
            labels.push(match_label);
        }
    }
    labels
}

#[tokio::test]
async fn shutdown_fails_jobs_still_waiting_on_buffers() {
    let pipeline = Pipeline::start(FakeTrimmer::new(), 3, 200);
    let mut events = pipeline.status.subscribe();
    let (scheduler, status, trimmer) = (
        pipeline.scheduler.clone(),
        pipeline.status.clone(),
        pipeline.trimmer.clone(),
    );

    // The match ends in 5 seconds, so its job is still waiting when shutdown comes.
    let now = Utc::now();
    assert!(scheduler.on_match_ended(&match_ended(1, "Q14", now, -100, 5)));
    let id = ClipId::new(field(1), "Q14");
    assert_eq!(scheduler.job(&id).unwrap().status, ClipStatus::Pending);

    pipeline.stop().await;

    let job = scheduler.job(&id).unwrap();
    assert_eq!(job.status, ClipStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("not run: shutdown"));
    assert_eq!(trimmer.calls(), 0);

    let snapshot = status.snapshot();
    assert_eq!(snapshot.jobs.pending, 0);
    assert_eq!(snapshot.jobs.failed, 1);
    assert!(snapshot.last_extraction_error.unwrap().message.contains("Q14"));
    assert_eq!(failed_labels(&mut events), vec!["Q14"]);

    // Work arriving after shutdown is failed, not left pending.
    assert!(scheduler.on_match_ended(&match_ended(2, "Q15", now, 0, 10)));
    let late = scheduler.job(&ClipId::new(field(2), "Q15")).unwrap();
    assert_eq!(late.status, ClipStatus::Failed);
    assert_eq!(status.snapshot().jobs.pending, 0);
}

#[tokio::test]
async fn failure_during_shutdown_is_not_retried() {
    let trimmer = FakeTrimmer::failing(10).with_delay(Duration::from_millis(200));
    let pipeline = Pipeline::start(trimmer, 3, 200);
    let mut events = pipeline.status.subscribe();
    let (scheduler, trimmer) = (pipeline.scheduler.clone(), pipeline.trimmer.clone());
    let id = ClipId::new(field(1), "Q16");

    scheduler.on_match_ended(&match_ended(1, "Q16", pipeline.recording_start, 20, 170));
    assert!(pipeline.wait_for_status(&id, ClipStatus::Running).await);

    // The attempt fails inside the 500ms grace period.
    pipeline.stop().await;

    let job = scheduler.job(&id).unwrap();
    assert_eq!(job.status, ClipStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("ffmpeg"));
    assert_eq!(trimmer.calls(), 1);
    assert_eq!(failed_labels(&mut events), vec!["Q16"]);
}

#[tokio::test]
async fn parallel_fields_extract_independently() {
    let pipeline = Pipeline::start(FakeTrimmer::slow(Duration::from_millis(100)), 3, 300);
    let base = pipeline.recording_start;

    pipeline.scheduler.on_match_ended(&match_ended(1, "Q12", base, 10, 160));
    pipeline.scheduler.on_match_ended(&match_ended(2, "Q13", base, 15, 165));

    assert!(pipeline.wait_for_status(&ClipId::new(field(1), "Q12"), ClipStatus::Done).await);
    assert!(pipeline.wait_for_status(&ClipId::new(field(2), "Q13"), ClipStatus::Done).await);

    let mut names: Vec<String> = scan_artifacts(pipeline.clips.path())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Q12 - Field 1.mp4", "Q13 - Field 2.mp4"]);

    pipeline.stop().await;
}
