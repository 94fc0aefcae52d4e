//! Wiring, run loop and shutdown.
//!
//! [`Orchestrator::builder`] assembles the components and binds the HTTP
//! listener; [`Orchestrator::run`] owns the tracker and drives it from the
//! scoring feed until shutdown.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use matchbox_av::{FfmpegTrimmer, TrimRequest, Trimmer};
use matchbox_common::{BackoffPolicy, FieldNumber};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::advertise::{LoggingAdvertiser, ServiceAdvertiser, ServiceRecord};
use crate::agents::{AgentKind, AgentSupervisor};
use crate::clips::{ClipScheduler, RecordingSource, SchedulerSettings, StaticRecording, VideoExtractor};
use crate::config::{scene_map, Config};
use crate::events::FieldEvent;
use crate::obs::ObsClient;
use crate::server::{AppContext, MediaServer};
use crate::state::StatusBoard;
use crate::stream::{EventStream, EventStreamClient, StreamSettings};
use crate::switcher::SwitchController;
use crate::tracker::MatchStateTracker;

const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Trimmer used when ffmpeg cannot be found; every extraction fails and is
/// reported, the rest of the system keeps running.
struct UnavailableTrimmer;

#[async_trait]
impl Trimmer for UnavailableTrimmer {
    async fn trim(&self, _request: &TrimRequest) -> matchbox_av::Result<()> {
        Err(matchbox_av::Error::tool_not_found("ffmpeg"))
    }
}

pub struct OrchestratorBuilder {
    config: Config,
    advertiser: Option<Arc<dyn ServiceAdvertiser>>,
    trimmer: Option<Arc<dyn Trimmer>>,
    recording: Option<Arc<dyn RecordingSource>>,
}

impl OrchestratorBuilder {
    pub fn advertiser(mut self, advertiser: Arc<dyn ServiceAdvertiser>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    /// Replace the ffmpeg trimmer.
    pub fn trimmer(mut self, trimmer: Arc<dyn Trimmer>) -> Self {
        self.trimmer = Some(trimmer);
        self
    }

    /// Replace the recording lookup (configured path or controller).
    pub fn recording_source(mut self, source: Arc<dyn RecordingSource>) -> Self {
        self.recording = Some(source);
        self
    }

    /// Start every component and bind the HTTP listener.
    ///
    /// Failing to bind is the only fatal startup error.
    pub async fn start(self) -> Result<Orchestrator> {
        let config = self.config;
        let fields: Vec<FieldNumber> = (1..=config.fields.count)
            .filter_map(|n| FieldNumber::new(n).ok())
            .collect();
        let status = StatusBoard::new(config.event_code.clone(), fields.iter().copied());

        let clips_dir = config.event_clips_dir();
        tokio::fs::create_dir_all(&clips_dir)
            .await
            .with_context(|| format!("Failed to create clip directory {:?}", clips_dir))?;

        let scenes = scene_map(&config.fields).context("Invalid scene mapping")?;
        let obs = Arc::new(ObsClient::new(&config.controller).with_status(status.clone()));

        let switch_cancel = CancellationToken::new();
        let (switcher, switch_handle) = SwitchController::spawn(
            obs.clone(),
            scenes,
            BackoffPolicy::bounded(
                config.controller.switch_attempts.max(1),
                Duration::from_millis(500),
                Duration::from_secs(5),
            ),
            status.clone(),
            switch_cancel.clone(),
        );

        let recording: Arc<dyn RecordingSource> = match (self.recording, &config.recording.path) {
            (Some(source), _) => source,
            (None, Some(path)) => {
                tracing::info!("Using pinned recording {:?}", path);
                Arc::new(StaticRecording::new(path.clone()))
            }
            (None, None) => obs.clone() as Arc<dyn RecordingSource>,
        };
        let trimmer = match self.trimmer {
            Some(trimmer) => trimmer,
            None => discover_trimmer(&config, &status).await,
        };

        let pipeline_cancel = CancellationToken::new();
        let (scheduler, scheduler_handle) = ClipScheduler::spawn(
            Arc::new(VideoExtractor::new(recording, trimmer)),
            SchedulerSettings::from_config(&config),
            status.clone(),
            pipeline_cancel.clone(),
        );

        let ctx = AppContext::new(status.clone(), clips_dir.clone()).with_scheduler(scheduler.clone());
        let server = match MediaServer::bind(&config.server.host, config.server.port, ctx).await {
            Ok(server) => server,
            Err(e) => {
                pipeline_cancel.cancel();
                switch_cancel.cancel();
                return Err(e);
            }
        };
        let local_addr = server.local_addr()?;
        let server_cancel = CancellationToken::new();
        let server_handle = tokio::spawn(server.serve(server_cancel.clone()));

        let advertiser = self
            .advertiser
            .unwrap_or_else(|| Arc::new(LoggingAdvertiser::new()));
        let record = ServiceRecord::for_clip_server(
            &config.server.mdns_name,
            local_addr.port(),
            &config.event_code,
        );
        if let Err(e) = advertiser.register(&record).await {
            tracing::warn!("{}", e);
        }

        let agents = Arc::new(AgentSupervisor::new(
            &config.agents,
            &clips_dir,
            &config.event_code,
            local_addr.port(),
            status.clone(),
        ));
        for kind in [AgentKind::Mirror, AgentKind::Tunnel] {
            if agents.is_configured(kind) {
                if let Err(e) = agents.start(kind) {
                    tracing::warn!("{}", e);
                }
            }
        }

        let mut tracker = MatchStateTracker::new(fields).with_stale_timeout(
            config
                .fields
                .stale_match_timeout_secs
                .map(Duration::from_secs),
        );
        tracker.subscribe(Arc::new(status.clone()));
        tracker.subscribe(Arc::new(switcher));
        tracker.subscribe(Arc::new(scheduler.clone()));

        let settings = StreamSettings::from_config(&config);
        tracing::info!("Following scoring feed {}", settings.url);
        let stream = EventStreamClient::connect(settings);

        Ok(Orchestrator {
            stale_check: config.fields.stale_match_timeout_secs.is_some(),
            status,
            clips_dir,
            local_addr,
            tracker,
            stream,
            scheduler,
            scheduler_handle,
            pipeline_cancel,
            switch_handle,
            switch_cancel,
            server_handle,
            server_cancel,
            advertiser,
            agents,
            obs,
        })
    }
}

async fn discover_trimmer(config: &Config, status: &StatusBoard) -> Arc<dyn Trimmer> {
    let trimmer = match FfmpegTrimmer::discover(config.tools.ffmpeg_path.as_deref()) {
        Ok(trimmer) => {
            trimmer.with_timeout(Duration::from_secs(config.clips.tool_timeout_secs.max(1)))
        }
        Err(e) => {
            tracing::warn!("Clip extraction unavailable: {}", e);
            status.report_config_error(format!("clip extraction unavailable: {e}"));
            return Arc::new(UnavailableTrimmer);
        }
    };

    match trimmer.check_container(&config.clips.container).await {
        Ok(check) if check.muxer_supported => tracing::info!("{}", check.describe()),
        Ok(check) => {
            tracing::warn!("{}", check.describe());
            status.report_config_error(check.describe());
        }
        Err(e) => tracing::warn!("Could not query {:?}: {}", trimmer.ffmpeg(), e),
    }
    Arc::new(trimmer)
}

/// The running system.
pub struct Orchestrator {
    status: StatusBoard,
    clips_dir: PathBuf,
    local_addr: SocketAddr,
    stale_check: bool,
    tracker: MatchStateTracker,
    stream: EventStream,
    scheduler: ClipScheduler,
    scheduler_handle: JoinHandle<()>,
    pipeline_cancel: CancellationToken,
    switch_handle: JoinHandle<()>,
    switch_cancel: CancellationToken,
    server_handle: JoinHandle<Result<()>>,
    server_cancel: CancellationToken,
    advertiser: Arc<dyn ServiceAdvertiser>,
    agents: Arc<AgentSupervisor>,
    obs: Arc<ObsClient>,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            advertiser: None,
            trimmer: None,
            recording: None,
        }
    }

    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn clips_dir(&self) -> &std::path::Path {
        &self.clips_dir
    }

    pub fn scheduler(&self) -> ClipScheduler {
        self.scheduler.clone()
    }

    /// Start/stop triggers for the mirror and tunnel agents.
    pub fn agents(&self) -> Arc<AgentSupervisor> {
        self.agents.clone()
    }

    /// Process feed events until `shutdown` fires, then stop everything.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut connected = self.stream.status();
        let mut watching = true;
        let mut stale_tick = tokio::time::interval(STALE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.stream.recv() => match event {
                    Some(event) => self.handle_event(&event),
                    None => {
                        tracing::error!("Scoring feed client stopped unexpectedly");
                        break;
                    }
                },
                changed = connected.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let is_connected = *connected.borrow_and_update();
                    self.status.set_stream_connected(is_connected);
                }
                _ = stale_tick.tick(), if self.stale_check => {
                    let expired = self.tracker.expire_stale(Utc::now());
                    if !expired.is_empty() {
                        tracing::info!("Expired {} stale match(es)", expired.len());
                    }
                }
            }
        }

        self.shutdown().await
    }

    fn handle_event(&mut self, event: &FieldEvent) {
        if let Err(e) = self.tracker.on_event(event) {
            tracing::warn!(field = %event.field, "Ignoring event: {}", e);
            self.status.report_config_error(e.to_string());
        }
    }

    async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down...");

        self.stream.close().await;
        self.status.set_stream_connected(false);

        self.pipeline_cancel.cancel();
        if let Err(e) = self.scheduler_handle.await {
            tracing::error!("Clip scheduler task failed: {}", e);
        }

        self.switch_cancel.cancel();
        if let Err(e) = self.switch_handle.await {
            tracing::error!("Switch worker task failed: {}", e);
        }

        self.server_cancel.cancel();
        let server_result = match self.server_handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Media server task failed: {}", e)),
        };

        if let Err(e) = self.advertiser.deregister().await {
            tracing::warn!("{}", e);
        }
        self.agents.shutdown().await;
        self.obs.disconnect().await;

        tracing::info!("Shutdown complete");
        server_result
    }
}
