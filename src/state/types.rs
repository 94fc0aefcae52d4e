use chrono::{DateTime, Utc};
use matchbox_common::FieldNumber;
use serde::{Deserialize, Serialize};

use crate::tracker::FieldPhase;

/// Point-in-time view of the whole orchestrator, read by front ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub event_code: String,
    pub stream_connected: bool,
    pub controller_connected: bool,
    /// One entry per configured field, ordered by field number.
    pub fields: Vec<FieldStatus>,
    /// Scene most recently selected on the controller.
    pub current_scene: Option<String>,
    pub artifact_count: usize,
    pub jobs: JobCounts,
    pub last_extraction_error: Option<ErrorReport>,
    pub last_switch_error: Option<ErrorReport>,
    pub last_config_error: Option<ErrorReport>,
    pub agents: AgentStatus,
}

impl StatusSnapshot {
    pub fn field(&self, field: FieldNumber) -> Option<&FieldStatus> {
        self.fields.iter().find(|f| f.field == field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStatus {
    pub field: FieldNumber,
    pub phase: FieldPhase,
    pub match_label: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl FieldStatus {
    pub fn idle(field: FieldNumber) -> Self {
        Self {
            field,
            phase: FieldPhase::Idle,
            match_label: None,
            activated_at: None,
        }
    }
}

/// Clip job totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub mirror_running: bool,
    pub tunnel_running: bool,
}
