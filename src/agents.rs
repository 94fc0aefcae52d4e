//! Start/stop triggers for the mirroring and tunnel agents.
//!
//! Agents are external commands configured by the operator; the supervisor
//! only spawns them, reports whether they run, and kills them on stop or at
//! shutdown. Their transport is their own business.

use matchbox_av::TemplateContext;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentsConfig;
use crate::state::StatusBoard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Copies the artifact directory elsewhere.
    Mirror,
    /// Relays the HTTP surface through a remote endpoint.
    Tunnel,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Mirror => "mirror",
            Self::Tunnel => "tunnel",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no command configured for the {0} agent")]
    NotConfigured(AgentKind),

    #[error("failed to start the {agent} agent: {message}")]
    Spawn { agent: AgentKind, message: String },
}

struct RunningAgent {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AgentSupervisor {
    commands: HashMap<AgentKind, Vec<String>>,
    running: Arc<Mutex<HashMap<AgentKind, RunningAgent>>>,
    status: StatusBoard,
}

impl AgentSupervisor {
    /// Substitutes `{clips_dir}`, `{event_code}` and `{port}` into the configured commands.
    pub fn new(
        config: &AgentsConfig,
        clips_dir: &Path,
        event_code: &str,
        port: u16,
        status: StatusBoard,
    ) -> Self {
        let ctx = TemplateContext::new()
            .with_clips_dir(clips_dir)
            .with_var("event_code", event_code)
            .with_var("port", &port.to_string());

        let commands = [
            (AgentKind::Mirror, &config.mirror),
            (AgentKind::Tunnel, &config.tunnel),
        ]
        .into_iter()
        .filter(|(_, agent)| agent.is_configured())
        .map(|(kind, agent)| (kind, ctx.substitute_all(&agent.command)))
        .collect();

        Self {
            commands,
            running: Arc::new(Mutex::new(HashMap::new())),
            status,
        }
    }

    pub fn is_configured(&self, kind: AgentKind) -> bool {
        self.commands.contains_key(&kind)
    }

    pub fn is_running(&self, kind: AgentKind) -> bool {
        self.running.lock().contains_key(&kind)
    }

    /// Start an agent. Starting one that already runs does nothing.
    pub fn start(&self, kind: AgentKind) -> Result<(), AgentError> {
        let argv = self
            .commands
            .get(&kind)
            .ok_or(AgentError::NotConfigured(kind))?;
        let (program, args) = argv.split_first().ok_or(AgentError::NotConfigured(kind))?;

        let mut running = self.running.lock();
        if running.contains_key(&kind) {
            tracing::debug!(agent = %kind, "Agent already running");
            return Ok(());
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Spawn {
                agent: kind,
                message: e.to_string(),
            })?;
        tracing::info!(agent = %kind, pid = ?child.id(), "Started agent: {}", argv.join(" "));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            let registry = self.running.clone();
            let status = self.status.clone();
            async move {
                tokio::select! {
                    exit = child.wait() => {
                        match exit {
                            Ok(code) => tracing::warn!(agent = %kind, "Agent exited with {}", code),
                            Err(e) => tracing::error!(agent = %kind, "Failed waiting for agent: {}", e),
                        }
                        registry.lock().remove(&kind);
                    }
                    _ = cancel.cancelled() => {
                        if let Err(e) = child.kill().await {
                            tracing::warn!(agent = %kind, "Failed to kill agent: {}", e);
                        }
                        tracing::info!(agent = %kind, "Stopped agent");
                    }
                }
                status.set_agent_running(kind, false);
            }
        });

        running.insert(kind, RunningAgent { cancel, handle });
        drop(running);
        self.status.set_agent_running(kind, true);
        Ok(())
    }

    /// Stop an agent and wait for it to exit. Stopping one that is not running does nothing.
    pub async fn stop(&self, kind: AgentKind) {
        let agent = self.running.lock().remove(&kind);
        if let Some(agent) = agent {
            agent.cancel.cancel();
            let _ = agent.handle.await;
        }
    }

    /// Stop every running agent.
    pub async fn shutdown(&self) {
        for kind in [AgentKind::Mirror, AgentKind::Tunnel] {
            self.stop(kind).await;
        }
    }
}
