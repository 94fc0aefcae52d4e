//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temporary clip directory, a
//! status board and a full [`AppContext`]. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for HTTP-level testing. Fakes
//! for the recording source and trimmer let the clip pipeline run without
//! ffmpeg.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matchbox::clips::{ActiveRecording, RecordingSource, SchedulerSettings};
use matchbox::error::ExtractionError;
use matchbox::server::{create_router, AppContext};
use matchbox::state::StatusBoard;
use matchbox::tracker::MatchEnded;
use matchbox_av::{TrimRequest, Trimmer};
use matchbox_common::{BackoffPolicy, FieldNumber};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const EVENT_CODE: &str = "TESTEVT";

pub fn field(n: u32) -> FieldNumber {
    FieldNumber::new(n).expect("valid field number")
}

/// Test harness wrapping an [`AppContext`] backed by a temporary directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub status: StatusBoard,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let status = StatusBoard::new(EVENT_CODE, [field(1), field(2)]);
        let ctx = AppContext::new(status.clone(), dir.path().to_path_buf());
        Self { ctx, status, dir }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.ctx.clone())
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = harness.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn clips_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file into the clip directory.
    pub fn write_clip(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("failed to write clip");
        path
    }
}

/// `bytes` repeated pattern 0..=255, so ranges are easy to check.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Scheduler settings scaled down to milliseconds.
pub fn fast_settings(output_dir: &Path, max_attempts: u32) -> SchedulerSettings {
    SchedulerSettings {
        output_dir: output_dir.to_path_buf(),
        container: "mp4".to_string(),
        pre_buffer: Duration::from_secs(10),
        post_buffer: Duration::from_millis(20),
        settle: Duration::from_millis(10),
        workers: 2,
        retry: BackoffPolicy::bounded(
            max_attempts,
            Duration::from_millis(10),
            Duration::from_millis(50),
        ),
        shutdown_grace: Duration::from_millis(500),
    }
}

pub fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + chrono::Duration::seconds(secs)
}

/// A match on `field` that started `start` and ended `end` seconds after `base`.
pub fn match_ended(field_no: u32, label: &str, base: DateTime<Utc>, start: i64, end: i64) -> MatchEnded {
    MatchEnded {
        field: field(field_no),
        match_label: label.to_string(),
        activated_at: at(base, start),
        ended_at: at(base, end),
    }
}

/// Recording source that always returns the same file and start instant.
pub struct FixedRecording {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
impl RecordingSource for FixedRecording {
    async fn active_recording(&self, _field: FieldNumber) -> Result<ActiveRecording, ExtractionError> {
        Ok(ActiveRecording {
            path: self.path.clone(),
            started_at: self.started_at,
        })
    }
}

/// Trimmer that writes a marker instead of running ffmpeg.
///
/// The first `failures` calls fail like a crashed ffmpeg would.
#[derive(Default)]
pub struct FakeTrimmer {
    failures: u32,
    calls: AtomicU32,
    delay: Duration,
    pub requests: Mutex<Vec<TrimRequest>>,
}

impl FakeTrimmer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Make every call take `delay` before succeeding or failing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trimmer for FakeTrimmer {
    async fn trim(&self, request: &TrimRequest) -> matchbox_av::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call <= self.failures {
            return Err(matchbox_av::Error::tool_failed("ffmpeg", "exit status: 1"));
        }
        let contents = format!(
            "clip {:.3}+{:.3} call {}",
            request.start.as_secs_f64(),
            request.duration.as_secs_f64(),
            call
        );
        tokio::fs::write(&request.output, contents).await?;
        Ok(())
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
