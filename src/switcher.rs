//! Scene switching on field activation.
//!
//! [`SwitchController::activate`] only enqueues; a single worker task talks
//! to the production controller, retrying transport failures a few times.
//! A newer activation supersedes one still retrying, and missed switches are
//! never queued for later.

use async_trait::async_trait;
use backon::Retryable;
use matchbox_common::{BackoffPolicy, FieldNumber};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, SwitchError};
use crate::state::StatusBoard;
use crate::tracker::{Transition, TransitionListener};

/// Something that can select a scene by name.
///
/// Selecting the scene that is already live must succeed.
#[async_trait]
pub trait SceneSwitcher: Send + Sync {
    async fn select_scene(&self, scene: &str) -> Result<(), SwitchError>;
}

/// Handle for requesting scene switches.
#[derive(Clone)]
pub struct SwitchController {
    tx: mpsc::UnboundedSender<FieldNumber>,
    generation: Arc<AtomicU64>,
}

impl SwitchController {
    /// Start the switch worker. It exits when `cancel` fires or every handle is dropped.
    pub fn spawn(
        switcher: Arc<dyn SceneSwitcher>,
        scenes: HashMap<FieldNumber, String>,
        policy: BackoffPolicy,
        status: StatusBoard,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));

        let worker = SwitchWorker {
            rx,
            switcher,
            scenes,
            policy,
            status,
            generation: generation.clone(),
        };
        let handle = tokio::spawn(worker.run(cancel));

        (Self { tx, generation }, handle)
    }

    /// Request the scene mapped to `field`. Never blocks.
    pub fn activate(&self, field: FieldNumber) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(field).is_err() {
            tracing::warn!(field = %field, "Switch worker has stopped; dropping scene switch");
        }
    }
}

impl TransitionListener for SwitchController {
    fn on_transition(&self, transition: &Transition) {
        match transition {
            Transition::Started { field, .. } | Transition::Shown { field, .. } => {
                self.activate(*field)
            }
            Transition::Ended(_) | Transition::Aborted { .. } => {}
        }
    }
}

struct SwitchWorker {
    rx: mpsc::UnboundedReceiver<FieldNumber>,
    switcher: Arc<dyn SceneSwitcher>,
    scenes: HashMap<FieldNumber, String>,
    policy: BackoffPolicy,
    status: StatusBoard,
    generation: Arc<AtomicU64>,
}

impl SwitchWorker {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let mut field = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(field) => field,
                    None => break,
                },
            };
            // Only the most recent request matters.
            while let Ok(newer) = self.rx.try_recv() {
                field = newer;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.switch(field) => {}
            }
        }
        tracing::debug!("Switch worker stopped");
    }

    async fn switch(&self, field: FieldNumber) {
        let Some(scene) = self.scenes.get(&field) else {
            let err = ConfigError::UnmappedField(field);
            tracing::error!(field = %field, "{}", err);
            self.status.report_config_error(err.to_string());
            return;
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let superseded = || self.generation.load(Ordering::SeqCst) != generation;
        let attempts = AtomicU32::new(0);
        let (switcher, counter) = (&self.switcher, &attempts);

        let result = (|| async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(field = %field, scene = %scene, attempt, "Selecting scene");
            switcher.select_scene(scene).await
        })
        .retry(self.policy.builder())
        .sleep(tokio::time::sleep)
        // A rejection will not change on retry; a newer activation wins.
        .when(|e: &SwitchError| !matches!(e, SwitchError::Rejected { .. }) && !superseded())
        .notify(|e: &SwitchError, delay: Duration| {
            tracing::debug!(field = %field, ?delay, error = %e, "Retrying scene switch");
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(field = %field, scene = %scene, "Switched scene");
                self.status.scene_switched(field, scene);
            }
            Err(e) if superseded() => {
                tracing::debug!(
                    field = %field,
                    error = %e,
                    "Scene switch superseded by a newer activation"
                );
            }
            Err(e) => {
                let err = SwitchError::Exhausted {
                    field,
                    scene: scene.clone(),
                    attempts: attempts.load(Ordering::SeqCst),
                    last_error: e.to_string(),
                };
                tracing::error!(field = %field, "{}", err);
                self.status.report_switch_error(field, err.to_string());
            }
        }
    }
}
