use chrono::Utc;
use futures::StreamExt;
use matchbox_common::paths::artifact_file_name;
use matchbox_common::{BackoffPolicy, ClipId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use super::{ClipArtifact, ClipExtractor, ClipJob, ClipStatus, ClipWindow};
use crate::config::Config;
use crate::error::ExtractionError;
use crate::state::{AppEvent, JobCounts, StatusBoard};
use crate::tracker::{MatchEnded, Transition, TransitionListener};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Directory artifacts are written to.
    pub output_dir: PathBuf,
    pub container: String,
    pub pre_buffer: Duration,
    pub post_buffer: Duration,
    /// Extra wait after the post buffer before extraction starts.
    pub settle: Duration,
    /// Concurrent extractions.
    pub workers: usize,
    /// Per-job retry policy; `max_attempts` is the attempt ceiling.
    pub retry: BackoffPolicy,
    /// How long shutdown waits for running extractions before killing them.
    pub shutdown_grace: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        let clips = &config.clips;
        Self {
            output_dir: config.event_clips_dir(),
            container: clips.container.clone(),
            pre_buffer: clips.pre_buffer(),
            post_buffer: clips.post_buffer(),
            settle: clips.settle(),
            workers: clips.workers.max(1),
            retry: BackoffPolicy::bounded(
                clips.max_attempts,
                Duration::from_secs(clips.retry_initial_secs),
                Duration::from_secs(clips.retry_max_secs),
            ),
            shutdown_grace: Duration::from_secs(clips.shutdown_grace_secs),
        }
    }
}

const NOT_RUN: &str = "not run: shutdown";
const INTERRUPTED: &str = "interrupted by shutdown";

#[derive(Debug, thiserror::Error)]
pub enum ResubmitError {
    #[error("no clip job for {0}")]
    UnknownJob(ClipId),

    #[error("clip job for {0} is still in progress")]
    InProgress(ClipId),
}

struct Schedule {
    id: ClipId,
    delay: Duration,
}

struct Shared {
    jobs: Mutex<HashMap<ClipId, ClipJob>>,
    settings: SchedulerSettings,
    status: StatusBoard,
}

impl Shared {
    fn publish_counts(&self) {
        let counts = {
            let jobs = self.jobs.lock();
            jobs.values().fold(JobCounts::default(), |mut c, job| {
                match job.status {
                    ClipStatus::Pending => c.pending += 1,
                    ClipStatus::Running => c.running += 1,
                    ClipStatus::Done => c.done += 1,
                    ClipStatus::Failed => c.failed += 1,
                }
                c
            })
        };
        self.status.set_job_counts(counts);
    }

    /// Apply `f` to a job and publish the new counts.
    fn update<T>(&self, id: &ClipId, f: impl FnOnce(&mut ClipJob) -> T) -> Option<T> {
        let result = {
            let mut jobs = self.jobs.lock();
            jobs.get_mut(id).map(|job| {
                let out = f(job);
                job.updated_at = Utc::now();
                out
            })
        };
        self.publish_counts();
        result
    }

    /// Mark an unfinished job FAILED for good and announce it. Returns
    /// `false` if the job is unknown or already finished.
    fn fail(&self, id: &ClipId, message: String) -> bool {
        let attempts = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(id).filter(|job| !job.is_finished()) else {
                return false;
            };
            job.status = ClipStatus::Failed;
            job.last_error = Some(message.clone());
            job.updated_at = Utc::now();
            job.attempts
        };
        self.publish_counts();

        tracing::error!(job = %id, attempts, "Clip extraction failed permanently: {}", message);
        self.status.emit(AppEvent::ClipFailed {
            field: id.field,
            match_label: id.match_label.clone(),
            attempts,
            error: message,
        });
        true
    }

    /// Fail every job still in `status` because the pipeline is stopping.
    fn fail_remaining(&self, status: ClipStatus, reason: &str) -> usize {
        let ids: Vec<ClipId> = self
            .jobs
            .lock()
            .values()
            .filter(|job| job.status == status)
            .map(|job| job.id.clone())
            .collect();
        for id in &ids {
            self.status.report_extraction_error(format!("{}: {}", id, reason));
            self.fail(id, reason.to_string());
        }
        ids.len()
    }
}

/// Creates one clip job per completed match and runs it after the post
/// buffer has been recorded.
///
/// Scheduling is synchronous and never waits on extraction; a dispatcher
/// task owns the deadline queue and a bounded pool of extraction tasks.
#[derive(Clone)]
pub struct ClipScheduler {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Schedule>,
}

impl ClipScheduler {
    /// Start the dispatcher. It stops taking new work when `cancel` fires,
    /// then gives running extractions the shutdown grace period.
    pub fn spawn(
        extractor: Arc<dyn ClipExtractor>,
        settings: SchedulerSettings,
        status: StatusBoard,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(settings.workers.max(1)));
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            settings,
            status,
        });

        let dispatcher = Dispatcher {
            rx,
            shared: shared.clone(),
            extractor,
            permits,
            queue: DelayQueue::new(),
            running: JoinSet::new(),
            draining: false,
        };
        let handle = tokio::spawn(dispatcher.run(cancel));

        (Self { shared, tx }, handle)
    }

    /// Create the clip job for a completed match.
    ///
    /// Returns `false` without doing anything when a job for the same field
    /// and match label already exists.
    pub fn on_match_ended(&self, ended: &MatchEnded) -> bool {
        let settings = &self.shared.settings;
        let id = ClipId::new(ended.field, ended.match_label.clone());
        let window = ClipWindow::around(ended, settings.pre_buffer, settings.post_buffer);
        let wait = chrono::Duration::from_std(settings.post_buffer + settings.settle)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let due_at = ended.ended_at + wait;
        let now = Utc::now();

        {
            let mut jobs = self.shared.jobs.lock();
            if jobs.contains_key(&id) {
                tracing::debug!(job = %id, "Clip job already exists; ignoring duplicate match end");
                return false;
            }
            jobs.insert(
                id.clone(),
                ClipJob {
                    id: id.clone(),
                    window,
                    status: ClipStatus::Pending,
                    attempts: 0,
                    output_path: settings
                        .output_dir
                        .join(artifact_file_name(&id, &settings.container)),
                    last_error: None,
                    due_at,
                    updated_at: now,
                },
            );
        }

        let delay = (due_at - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(
            job = %id,
            delay_secs = delay.as_secs_f64(),
            "Scheduled clip extraction"
        );
        self.shared.status.emit(AppEvent::ClipQueued {
            field: id.field,
            match_label: id.match_label.clone(),
            due_at,
        });
        self.shared.publish_counts();
        self.enqueue(id, delay);
        true
    }

    /// Run a finished job again with a fresh attempt budget. The artifact
    /// overwrites the previous one.
    pub fn resubmit(&self, id: &ClipId) -> Result<(), ResubmitError> {
        {
            let mut jobs = self.shared.jobs.lock();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| ResubmitError::UnknownJob(id.clone()))?;
            if !job.is_finished() {
                return Err(ResubmitError::InProgress(id.clone()));
            }
            let now = Utc::now();
            job.status = ClipStatus::Pending;
            job.attempts = 0;
            job.last_error = None;
            job.due_at = now;
            job.updated_at = now;
        }

        tracing::info!(job = %id, "Resubmitted clip job");
        self.shared.publish_counts();
        self.enqueue(id.clone(), Duration::ZERO);
        Ok(())
    }

    pub fn job(&self, id: &ClipId) -> Option<ClipJob> {
        self.shared.jobs.lock().get(id).cloned()
    }

    /// All jobs, most recent match first.
    pub fn jobs(&self) -> Vec<ClipJob> {
        let mut jobs: Vec<ClipJob> = self.shared.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.window.start.cmp(&a.window.start));
        jobs
    }

    fn enqueue(&self, id: ClipId, delay: Duration) {
        if self.tx.send(Schedule { id: id.clone(), delay }).is_err() {
            tracing::warn!(job = %id, "Clip dispatcher has stopped; job will not run");
            self.shared
                .status
                .report_extraction_error(format!("{}: {}", id, NOT_RUN));
            self.shared.fail(&id, NOT_RUN.to_string());
        }
    }
}

impl TransitionListener for ClipScheduler {
    fn on_transition(&self, transition: &Transition) {
        if let Transition::Ended(ended) = transition {
            self.on_match_ended(ended);
        }
    }
}

/// `None` when the job was finished elsewhere before a worker picked it up.
type Outcome = (ClipId, Option<Result<ClipArtifact, ExtractionError>>);

struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Schedule>,
    shared: Arc<Shared>,
    extractor: Arc<dyn ClipExtractor>,
    permits: Arc<Semaphore>,
    queue: DelayQueue<ClipId>,
    running: JoinSet<Outcome>,
    /// Set once shutdown has begun; failed jobs are no longer retried.
    draining: bool,
}

impl Dispatcher {
    async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!("Clip dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(schedule) = self.rx.recv() => {
                    self.queue.insert(schedule.id, schedule.delay);
                }
                Some(expired) = self.queue.next() => {
                    self.start(expired.into_inner());
                }
                Some(joined) = self.running.join_next() => match joined {
                    Ok((id, Some(result))) => self.finish(id, result),
                    Ok((_, None)) => {}
                    Err(e) => tracing::error!("Extraction task failed: {}", e),
                },
            }
        }

        self.drain().await;
        tracing::debug!("Clip dispatcher stopped");
    }

    fn start(&mut self, id: ClipId) {
        let Some(job) = self.shared.jobs.lock().get(&id).cloned() else {
            return;
        };
        if job.status != ClipStatus::Pending {
            return;
        }

        let shared = self.shared.clone();
        let extractor = self.extractor.clone();
        let permits = self.permits.clone();

        self.running.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();

            // Shutdown may have failed the job while it waited for a permit.
            let attempt = shared
                .update(&id, |job| {
                    (job.status == ClipStatus::Pending).then(|| {
                        job.status = ClipStatus::Running;
                        job.attempts += 1;
                        job.attempts
                    })
                })
                .flatten();
            let Some(attempt) = attempt else {
                return (id, None);
            };
            tracing::info!(job = %id, attempt, "Extracting clip");
            shared.status.emit(AppEvent::ClipStarted {
                field: id.field,
                match_label: id.match_label.clone(),
                attempt,
            });

            let result = extractor.execute(&job).await;

            if result.is_ok() {
                let count = crate::catalog::scan_artifacts(&shared.settings.output_dir)
                    .await
                    .map(|artifacts| artifacts.len())
                    .unwrap_or(0);
                shared.status.set_artifact_count(count);
            }
            (id, Some(result))
        });
    }

    fn finish(&mut self, id: ClipId, result: Result<ClipArtifact, ExtractionError>) {
        let shared = &self.shared;

        match result {
            Ok(artifact) => {
                shared.update(&id, |job| {
                    job.status = ClipStatus::Done;
                    job.last_error = None;
                    job.output_path = artifact.path.clone();
                });
                tracing::info!(
                    job = %id,
                    path = ?artifact.path,
                    size_bytes = artifact.size_bytes,
                    "Clip ready"
                );
                shared.status.emit(AppEvent::ClipCompleted {
                    field: id.field,
                    match_label: id.match_label.clone(),
                    path: artifact.path,
                    size_bytes: artifact.size_bytes,
                });
            }
            Err(err) => {
                let message = err.to_string();
                shared.status.report_extraction_error(format!("{}: {}", id, message));

                let attempts = shared.jobs.lock().get(&id).map(|job| job.attempts).unwrap_or(0);
                let retry_in = if self.draining {
                    None
                } else {
                    shared.settings.retry.delay_after(attempts)
                };

                let Some(delay) = retry_in else {
                    shared.fail(&id, message);
                    return;
                };
                let due_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                shared.update(&id, |job| {
                    job.status = ClipStatus::Pending;
                    job.last_error = Some(message.clone());
                    job.due_at = due_at;
                });
                tracing::warn!(
                    job = %id,
                    attempt = attempts,
                    retry_in_secs = delay.as_secs_f64(),
                    "Clip extraction failed: {}",
                    message
                );
                shared.status.emit(AppEvent::ClipRetrying {
                    field: id.field,
                    match_label: id.match_label.clone(),
                    attempt: attempts,
                    error: message,
                    retry_in_secs: delay.as_secs_f64(),
                });
                self.queue.insert(id, delay);
            }
        }
    }

    /// Fail everything that has not started, let running extractions finish
    /// within the grace period, then kill the rest. Every job ends DONE or
    /// FAILED.
    async fn drain(&mut self) {
        self.draining = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        self.queue.clear();

        let not_run = self.shared.fail_remaining(ClipStatus::Pending, NOT_RUN);
        if not_run > 0 {
            tracing::warn!("{} clip job(s) will not run because of shutdown", not_run);
        }
        if self.running.is_empty() {
            return;
        }

        let grace = self.shared.settings.shutdown_grace;
        tracing::info!(
            "Waiting up to {:?} for {} running extraction(s)",
            grace,
            self.running.len()
        );

        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = self.running.join_next().await {
                if let Ok((id, Some(result))) = joined {
                    self.finish(id, result);
                }
            }
        })
        .await;

        if finished.is_err() {
            tracing::warn!(
                "Killing {} extraction(s) still running after the grace period",
                self.running.len()
            );
            self.running.shutdown().await;
            self.shared.fail_remaining(ClipStatus::Running, INTERRUPTED);
        }
    }
}
