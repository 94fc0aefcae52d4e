mod types;

pub use types::*;

use chrono::{DateTime, Utc};
use matchbox_common::FieldNumber;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::agents::AgentKind;
use crate::tracker::{AbortReason, FieldPhase, Transition, TransitionListener};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Application-wide event for SSE broadcasting and front-end logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AppEvent {
    // ========================================================================
    // Connections
    // ========================================================================
    StreamConnection {
        connected: bool,
    },
    ControllerConnection {
        connected: bool,
    },

    // ========================================================================
    // Match lifecycle
    // ========================================================================
    MatchStarted {
        field: FieldNumber,
        match_label: String,
    },
    MatchEnded {
        field: FieldNumber,
        match_label: String,
        duration_secs: f64,
    },
    MatchAborted {
        field: FieldNumber,
        match_label: String,
        reason: AbortReason,
    },
    FieldShown {
        field: FieldNumber,
    },

    // ========================================================================
    // Scene switching
    // ========================================================================
    SceneSwitched {
        field: FieldNumber,
        scene: String,
    },
    SwitchFailed {
        field: FieldNumber,
        error: String,
    },

    // ========================================================================
    // Clip jobs
    // ========================================================================
    ClipQueued {
        field: FieldNumber,
        match_label: String,
        due_at: DateTime<Utc>,
    },
    ClipStarted {
        field: FieldNumber,
        match_label: String,
        attempt: u32,
    },
    ClipRetrying {
        field: FieldNumber,
        match_label: String,
        attempt: u32,
        error: String,
        retry_in_secs: f64,
    },
    ClipCompleted {
        field: FieldNumber,
        match_label: String,
        path: PathBuf,
        size_bytes: u64,
    },
    ClipFailed {
        field: FieldNumber,
        match_label: String,
        attempts: u32,
        error: String,
    },

    // ========================================================================
    // Operations
    // ========================================================================
    ConfigError {
        message: String,
    },
    AgentStarted {
        agent: AgentKind,
    },
    AgentStopped {
        agent: AgentKind,
    },
}

/// Owner of the published status snapshot and the event bus.
///
/// Components never share mutable status; they call the update methods here,
/// which publish a fresh copy through a `watch` channel. Readers take
/// snapshots with [`StatusBoard::snapshot`] or subscribe for changes.
#[derive(Clone)]
pub struct StatusBoard {
    status: Arc<watch::Sender<StatusSnapshot>>,
    events: broadcast::Sender<AppEvent>,
}

impl StatusBoard {
    pub fn new(event_code: impl Into<String>, fields: impl IntoIterator<Item = FieldNumber>) -> Self {
        let mut fields: Vec<FieldStatus> = fields.into_iter().map(FieldStatus::idle).collect();
        fields.sort_by_key(|f| f.field);

        let initial = StatusSnapshot {
            event_code: event_code.into(),
            fields,
            ..Default::default()
        };
        let (status, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            status: Arc::new(status),
            events,
        }
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Subscribe to application events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot) -> bool) {
        self.status.send_if_modified(f);
    }

    pub fn set_stream_connected(&self, connected: bool) {
        let mut changed = false;
        self.update(|s| {
            changed = s.stream_connected != connected;
            s.stream_connected = connected;
            changed
        });
        if changed {
            self.emit(AppEvent::StreamConnection { connected });
        }
    }

    pub fn set_controller_connected(&self, connected: bool) {
        let mut changed = false;
        self.update(|s| {
            changed = s.controller_connected != connected;
            s.controller_connected = connected;
            changed
        });
        if changed {
            self.emit(AppEvent::ControllerConnection { connected });
        }
    }

    pub fn set_field(&self, status: FieldStatus) {
        self.update(|s| match s.fields.iter_mut().find(|f| f.field == status.field) {
            Some(existing) if *existing == status => false,
            Some(existing) => {
                *existing = status;
                true
            }
            None => {
                s.fields.push(status);
                s.fields.sort_by_key(|f| f.field);
                true
            }
        });
    }

    pub fn scene_switched(&self, field: FieldNumber, scene: &str) {
        self.update(|s| {
            s.current_scene = Some(scene.to_string());
            true
        });
        self.emit(AppEvent::SceneSwitched {
            field,
            scene: scene.to_string(),
        });
    }

    pub fn report_switch_error(&self, field: FieldNumber, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.last_switch_error = Some(ErrorReport::now(message.clone()));
            true
        });
        self.emit(AppEvent::SwitchFailed {
            field,
            error: message,
        });
    }

    pub fn report_extraction_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.last_extraction_error = Some(ErrorReport::now(message));
            true
        });
    }

    pub fn report_config_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.last_config_error = Some(ErrorReport::now(message.clone()));
            true
        });
        self.emit(AppEvent::ConfigError { message });
    }

    pub fn set_job_counts(&self, counts: JobCounts) {
        self.update(|s| {
            let changed = s.jobs != counts;
            s.jobs = counts;
            changed
        });
    }

    pub fn set_artifact_count(&self, count: usize) {
        self.update(|s| {
            let changed = s.artifact_count != count;
            s.artifact_count = count;
            changed
        });
    }

    pub fn set_agent_running(&self, agent: AgentKind, running: bool) {
        let mut changed = false;
        self.update(|s| {
            let flag = match agent {
                AgentKind::Mirror => &mut s.agents.mirror_running,
                AgentKind::Tunnel => &mut s.agents.tunnel_running,
            };
            changed = *flag != running;
            *flag = running;
            changed
        });
        if changed {
            self.emit(if running {
                AppEvent::AgentStarted { agent }
            } else {
                AppEvent::AgentStopped { agent }
            });
        }
    }
}

impl TransitionListener for StatusBoard {
    fn on_transition(&self, transition: &Transition) {
        match transition {
            Transition::Started {
                field,
                match_label,
                at,
            } => {
                self.set_field(FieldStatus {
                    field: *field,
                    phase: FieldPhase::Active,
                    match_label: Some(match_label.clone()),
                    activated_at: Some(*at),
                });
                self.emit(AppEvent::MatchStarted {
                    field: *field,
                    match_label: match_label.clone(),
                });
            }
            Transition::Ended(ended) => {
                self.set_field(FieldStatus::idle(ended.field));
                self.emit(AppEvent::MatchEnded {
                    field: ended.field,
                    match_label: ended.match_label.clone(),
                    duration_secs: ended.duration().as_secs_f64(),
                });
            }
            Transition::Aborted {
                field,
                match_label,
                reason,
                ..
            } => {
                self.set_field(FieldStatus::idle(*field));
                self.emit(AppEvent::MatchAborted {
                    field: *field,
                    match_label: match_label.clone(),
                    reason: *reason,
                });
            }
            Transition::Shown { field, .. } => {
                self.emit(AppEvent::FieldShown { field: *field });
            }
        }
    }
}
