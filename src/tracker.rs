//! Per-field match state machine.
//!
//! ```text
//! IDLE --MATCH_START--> ACTIVE --MATCH_END--> IDLE    (clip scheduled)
//!                       ACTIVE --MATCH_ABORT--> IDLE  (no clip)
//! ```
//!
//! The tracker is owned by the run loop and mutated only there. Other
//! components observe it through [`TransitionListener`] callbacks, which run
//! synchronously inside [`MatchStateTracker::on_event`] and must not block.

use chrono::{DateTime, Utc};
use matchbox_common::FieldNumber;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::events::{FieldEvent, FieldEventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPhase {
    Idle,
    Active,
}

/// Current state of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    pub field: FieldNumber,
    pub phase: FieldPhase,
    /// Set exactly when the phase is active.
    pub active_match_label: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl FieldState {
    fn idle(field: FieldNumber) -> Self {
        Self {
            field,
            phase: FieldPhase::Idle,
            active_match_label: None,
            activated_at: None,
        }
    }
}

/// A completed match, the input to clip scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEnded {
    pub field: FieldNumber,
    pub match_label: String,
    pub activated_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl MatchEnded {
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.activated_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The scoring system aborted the match.
    Signalled,
    /// A new MATCH_START arrived while the match was still active.
    Superseded,
    /// The match outlived the stale-match timeout.
    Stale,
}

/// A lifecycle transition emitted to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started {
        field: FieldNumber,
        match_label: String,
        at: DateTime<Utc>,
    },
    Ended(MatchEnded),
    Aborted {
        field: FieldNumber,
        match_label: String,
        reason: AbortReason,
        at: DateTime<Utc>,
    },
    /// The field was put on display; no phase change.
    Shown {
        field: FieldNumber,
        at: DateTime<Utc>,
    },
}

impl Transition {
    pub fn field(&self) -> FieldNumber {
        match self {
            Self::Started { field, .. } | Self::Aborted { field, .. } | Self::Shown { field, .. } => {
                *field
            }
            Self::Ended(ended) => ended.field,
        }
    }
}

/// Reaction to a transition. Called on the run loop; hand real work to a
/// worker and return.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

pub struct MatchStateTracker {
    fields: BTreeMap<FieldNumber, FieldState>,
    /// Labels that already went ACTIVE -> IDLE through a MATCH_END, per field.
    completed: HashMap<FieldNumber, HashSet<String>>,
    listeners: Vec<Arc<dyn TransitionListener>>,
    stale_timeout: Option<Duration>,
}

impl MatchStateTracker {
    pub fn new(fields: impl IntoIterator<Item = FieldNumber>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|field| (field, FieldState::idle(field)))
                .collect(),
            completed: HashMap::new(),
            listeners: Vec::new(),
            stale_timeout: None,
        }
    }

    /// Tracker for fields `1..=count`.
    pub fn with_field_count(count: u32) -> Self {
        Self::new((1..=count).filter_map(|n| FieldNumber::new(n).ok()))
    }

    pub fn with_stale_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Register a listener; listeners run in registration order.
    pub fn subscribe(&mut self, listener: Arc<dyn TransitionListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self, field: FieldNumber) -> Option<&FieldState> {
        self.fields.get(&field)
    }

    /// Copy of every field's state, ordered by field number.
    pub fn snapshot(&self) -> Vec<FieldState> {
        self.fields.values().cloned().collect()
    }

    /// Apply one event and notify listeners of the resulting transitions.
    ///
    /// Returns the transitions emitted. An event for a field that is not
    /// configured is a configuration error; the event is ignored.
    pub fn on_event(&mut self, event: &FieldEvent) -> Result<Vec<Transition>, ConfigError> {
        let count = self.fields.len() as u32;
        let Some(state) = self.fields.get_mut(&event.field) else {
            return Err(ConfigError::UnknownField {
                field: event.field,
                count,
            });
        };

        let mut transitions = Vec::new();
        match event.kind {
            FieldEventKind::MatchStart => {
                let completed = self
                    .completed
                    .get(&event.field)
                    .is_some_and(|labels| labels.contains(&event.match_label));
                if completed {
                    tracing::warn!(
                        field = %event.field,
                        match_label = %event.match_label,
                        "Ignoring MATCH_START for a match that already ended"
                    );
                    return Ok(transitions);
                }

                if state.phase == FieldPhase::Active {
                    let previous = state.active_match_label.clone().unwrap_or_default();
                    tracing::warn!(
                        field = %event.field,
                        previous = %previous,
                        match_label = %event.match_label,
                        "MATCH_START while a match is active; aborting the previous match"
                    );
                    *state = FieldState::idle(event.field);
                    transitions.push(Transition::Aborted {
                        field: event.field,
                        match_label: previous,
                        reason: AbortReason::Superseded,
                        at: event.received_at,
                    });
                }

                tracing::info!(field = %event.field, match_label = %event.match_label, "Match started");
                *state = FieldState {
                    field: event.field,
                    phase: FieldPhase::Active,
                    active_match_label: Some(event.match_label.clone()),
                    activated_at: Some(event.received_at),
                };
                transitions.push(Transition::Started {
                    field: event.field,
                    match_label: event.match_label.clone(),
                    at: event.received_at,
                });
            }

            FieldEventKind::MatchEnd | FieldEventKind::MatchAbort => {
                let (Some(active_label), Some(activated_at)) =
                    (state.active_match_label.clone(), state.activated_at)
                else {
                    tracing::debug!(
                        field = %event.field,
                        kind = ?event.kind,
                        match_label = %event.match_label,
                        "Ignoring end of match on an idle field"
                    );
                    return Ok(transitions);
                };

                if !event.match_label.is_empty() && event.match_label != active_label {
                    tracing::warn!(
                        field = %event.field,
                        active = %active_label,
                        match_label = %event.match_label,
                        kind = ?event.kind,
                        "Ignoring stale event for a different match"
                    );
                    return Ok(transitions);
                }

                *state = FieldState::idle(event.field);

                if event.kind == FieldEventKind::MatchEnd {
                    tracing::info!(field = %event.field, match_label = %active_label, "Match ended");
                    self.completed
                        .entry(event.field)
                        .or_default()
                        .insert(active_label.clone());
                    transitions.push(Transition::Ended(MatchEnded {
                        field: event.field,
                        match_label: active_label,
                        activated_at,
                        ended_at: event.received_at,
                    }));
                } else {
                    tracing::info!(field = %event.field, match_label = %active_label, "Match aborted");
                    transitions.push(Transition::Aborted {
                        field: event.field,
                        match_label: active_label,
                        reason: AbortReason::Signalled,
                        at: event.received_at,
                    });
                }
            }

            FieldEventKind::Show => {
                transitions.push(Transition::Shown {
                    field: event.field,
                    at: event.received_at,
                });
            }

            FieldEventKind::Unknown => {
                tracing::trace!(field = %event.field, "Ignoring unrecognized event");
            }
        }

        self.emit(&transitions);
        Ok(transitions)
    }

    /// Return matches active longer than the stale timeout to idle.
    ///
    /// No clip is scheduled for an expired match.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        let Some(timeout) = self.stale_timeout else {
            return Vec::new();
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };

        let mut transitions = Vec::new();
        for state in self.fields.values_mut() {
            let expired = state.phase == FieldPhase::Active
                && state.activated_at.is_some_and(|at| now - at >= timeout);
            if !expired {
                continue;
            }

            let label = state.active_match_label.clone().unwrap_or_default();
            tracing::warn!(field = %state.field, match_label = %label, "Match went stale; returning field to idle");
            transitions.push(Transition::Aborted {
                field: state.field,
                match_label: label,
                reason: AbortReason::Stale,
                at: now,
            });
            *state = FieldState::idle(state.field);
        }

        self.emit(&transitions);
        transitions
    }

    fn emit(&self, transitions: &[Transition]) {
        for transition in transitions {
            for listener in &self.listeners {
                listener.on_transition(transition);
            }
        }
    }
}
