use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Scoring system event code, e.g. "USCAFFL". Also names the clip subdirectory.
    #[serde(default)]
    pub event_code: String,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub fields: FieldsConfig,

    #[serde(default)]
    pub clips: ClipsConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub agents: AgentsConfig,
}

impl Config {
    /// Directory holding this event's artifacts.
    pub fn event_clips_dir(&self) -> PathBuf {
        self.clips.output_dir.join(&self.event_code)
    }
}

/// Scoring feed connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "default_localhost")]
    pub host: String,

    #[serde(default = "default_scoring_port")]
    pub port: u16,

    /// Interval between `ping` keepalives.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Replayed history discarded after the first connection.
    #[serde(default = "default_backlog_drain_secs")]
    pub backlog_drain_secs: u64,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
}

fn default_localhost() -> String {
    "localhost".to_string()
}
fn default_scoring_port() -> u16 {
    80
}
fn default_keepalive_secs() -> u64 {
    25
}
fn default_backlog_drain_secs() -> u64 {
    5
}
fn default_reconnect_initial_ms() -> u64 {
    500
}
fn default_reconnect_max_secs() -> u64 {
    30
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_scoring_port(),
            keepalive_secs: default_keepalive_secs(),
            backlog_drain_secs: default_backlog_drain_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_secs: default_reconnect_max_secs(),
        }
    }
}

/// Production controller (OBS websocket) connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default = "default_localhost")]
    pub host: String,

    #[serde(default = "default_controller_port")]
    pub port: u16,

    /// Websocket password; empty when authentication is disabled.
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per scene switch before giving up until the next trigger.
    #[serde(default = "default_switch_attempts")]
    pub switch_attempts: u32,
}

fn default_controller_port() -> u16 {
    4455
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_switch_attempts() -> u32 {
    3
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_controller_port(),
            password: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            switch_attempts: default_switch_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldsConfig {
    #[serde(default = "default_field_count")]
    pub count: u32,

    /// Field number (as a string key) to scene name. Empty means "Field N".
    #[serde(default)]
    pub scenes: BTreeMap<String, String>,

    /// Return a field to idle when a match stays active this long.
    #[serde(default)]
    pub stale_match_timeout_secs: Option<u64>,
}

fn default_field_count() -> u32 {
    2
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            count: default_field_count(),
            scenes: BTreeMap::new(),
            stale_match_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClipsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_buffer_secs")]
    pub pre_buffer_secs: f64,

    #[serde(default = "default_buffer_secs")]
    pub post_buffer_secs: f64,

    /// Extra wait after the post buffer so the recording has flushed.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_secs")]
    pub retry_initial_secs: u64,

    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,

    /// Concurrent extraction jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_container")]
    pub container: String,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./match_clips")
}
fn default_buffer_secs() -> f64 {
    10.0
}
fn default_settle_secs() -> f64 {
    8.0
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_initial_secs() -> u64 {
    5
}
fn default_retry_max_secs() -> u64 {
    60
}
fn default_workers() -> usize {
    2
}
fn default_container() -> String {
    "mp4".to_string()
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_tool_timeout_secs() -> u64 {
    600
}

impl Default for ClipsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            pre_buffer_secs: default_buffer_secs(),
            post_buffer_secs: default_buffer_secs(),
            settle_secs: default_settle_secs(),
            max_attempts: default_max_attempts(),
            retry_initial_secs: default_retry_initial_secs(),
            retry_max_secs: default_retry_max_secs(),
            workers: default_workers(),
            container: default_container(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl ClipsConfig {
    pub fn pre_buffer(&self) -> Duration {
        secs_f64(self.pre_buffer_secs)
    }

    pub fn post_buffer(&self) -> Duration {
        secs_f64(self.post_buffer_secs)
    }

    pub fn settle(&self) -> Duration {
        secs_f64(self.settle_secs)
    }
}

/// Negative and non-finite values are rejected by validation; map them to zero here.
fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecordingConfig {
    /// Pin the source recording instead of asking the controller.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Friendly hostname advertised on the local network.
    #[serde(default = "default_mdns_name")]
    pub mdns_name: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_mdns_name() -> String {
    "ftcvideo.local".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mdns_name: default_mdns_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub mirror: AgentConfig,

    #[serde(default)]
    pub tunnel: AgentConfig,
}

/// External command for an agent. Supports `{clips_dir}`, `{event_code}` and `{port}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub command: Vec<String>,
}

impl AgentConfig {
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}
