//! Production controller client (OBS websocket protocol v5).
//!
//! The connection is opened lazily on the first request, reused afterwards,
//! and dropped on any transport error so the next request reconnects.
//! Requests are serialized through one connection.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use matchbox_common::FieldNumber;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::clips::{ActiveRecording, RecordingSource};
use crate::config::ControllerConfig;
use crate::error::{ExtractionError, ExtractionErrorKind, SwitchError};
use crate::state::StatusBoard;
use crate::switcher::SceneSwitcher;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RPC_VERSION: u64 = 1;

/// Opcodes of the v5 protocol.
mod op {
    pub const HELLO: u64 = 0;
    pub const IDENTIFY: u64 = 1;
    pub const IDENTIFIED: u64 = 2;
    pub const REQUEST: u64 = 6;
    pub const REQUEST_RESPONSE: u64 = 7;
}

/// Close code the server uses for a failed Identify.
const CLOSE_AUTH_FAILED: u16 = 4009;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{request_type} failed with code {code}: {comment}")]
    Rejected {
        request_type: String,
        code: i64,
        comment: String,
    },

    #[error("connection closed")]
    Closed,

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl ControllerError {
    /// Whether the connection is unusable after this error.
    fn is_transport(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

impl From<ControllerError> for SwitchError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::Rejected {
                request_type,
                comment,
                ..
            } => SwitchError::Rejected {
                scene: request_type,
                message: comment,
            },
            other => SwitchError::Unreachable(other.to_string()),
        }
    }
}

/// Client for an OBS websocket server.
pub struct ObsClient {
    url: String,
    password: String,
    request_timeout: Duration,
    conn: Mutex<Option<WsStream>>,
    next_id: AtomicU64,
    status: Option<StatusBoard>,
}

impl ObsClient {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            url: format!("ws://{}:{}", config.host, config.port),
            password: config.password.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
            status: None,
        }
    }

    /// Publish connection changes to the status board.
    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn set_connected(&self, connected: bool) {
        if let Some(status) = &self.status {
            status.set_controller_connected(connected);
        }
    }

    /// Send one request and wait for its response data.
    pub async fn request(&self, request_type: &str, data: Option<Value>) -> Result<Value, ControllerError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            let ws = tokio::time::timeout(self.request_timeout, self.connect())
                .await
                .map_err(|_| ControllerError::Timeout(self.request_timeout))??;
            tracing::info!("Connected to controller at {}", self.url);
            *guard = Some(ws);
            self.set_connected(true);
        }
        let Some(ws) = guard.as_mut() else {
            return Err(ControllerError::Closed);
        };

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let result = tokio::time::timeout(
            self.request_timeout,
            exchange(ws, request_type, &request_id, data),
        )
        .await
        .unwrap_or(Err(ControllerError::Timeout(self.request_timeout)));

        if let Err(e) = &result {
            if e.is_transport() {
                tracing::warn!("Controller connection dropped: {}", e);
                *guard = None;
                self.set_connected(false);
            }
        }
        result
    }

    /// Close the connection if open.
    pub async fn disconnect(&self) {
        if let Some(mut ws) = self.conn.lock().await.take() {
            let _ = ws.close(None).await;
            self.set_connected(false);
        }
    }

    async fn connect(&self) -> Result<WsStream, ControllerError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ControllerError::Connect {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let hello = read_op(&mut ws, op::HELLO).await?;

        let mut identify = json!({
            "rpcVersion": RPC_VERSION,
            "eventSubscriptions": 0,
        });
        if let Some(auth) = hello.get("authentication") {
            let challenge = auth.get("challenge").and_then(Value::as_str);
            let salt = auth.get("salt").and_then(Value::as_str);
            let (Some(challenge), Some(salt)) = (challenge, salt) else {
                return Err(ControllerError::Protocol("malformed authentication challenge".into()));
            };
            if self.password.is_empty() {
                return Err(ControllerError::Auth("server requires a password".into()));
            }
            identify["authentication"] = json!(auth_response(&self.password, salt, challenge));
        }

        send_json(&mut ws, json!({ "op": op::IDENTIFY, "d": identify })).await?;
        read_op(&mut ws, op::IDENTIFIED).await?;

        Ok(ws)
    }

    async fn recording_path(&self, record_status: &Value) -> Option<PathBuf> {
        for output in ["adv_file_output", "simple_file_output"] {
            match self
                .request("GetOutputSettings", Some(json!({ "outputName": output })))
                .await
            {
                Ok(settings) => {
                    let path = settings
                        .pointer("/outputSettings/path")
                        .and_then(Value::as_str)
                        .filter(|p| !p.is_empty());
                    if let Some(path) = path {
                        return Some(PathBuf::from(path));
                    }
                }
                Err(e) => tracing::debug!(output, "No output settings: {}", e),
            }
        }

        record_status
            .get("outputPath")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

#[async_trait]
impl SceneSwitcher for ObsClient {
    async fn select_scene(&self, scene: &str) -> Result<(), SwitchError> {
        match self
            .request("SetCurrentProgramScene", Some(json!({ "sceneName": scene })))
            .await
        {
            Ok(_) => Ok(()),
            Err(ControllerError::Rejected { comment, .. }) => Err(SwitchError::Rejected {
                scene: scene.to_string(),
                message: comment,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordingSource for ObsClient {
    /// One recording covers every field.
    async fn active_recording(&self, _field: FieldNumber) -> Result<ActiveRecording, ExtractionError> {
        let unavailable = |e: ControllerError| {
            ExtractionError::new(ExtractionErrorKind::SourceUnavailable, e.to_string())
        };

        let status = self.request("GetRecordStatus", None).await.map_err(unavailable)?;
        if !status.get("outputActive").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ExtractionError::source_missing("controller is not recording"));
        }
        let elapsed_ms = status.get("outputDuration").and_then(Value::as_i64).unwrap_or(0);
        let started_at = Utc::now() - chrono::Duration::milliseconds(elapsed_ms.max(0));

        let path = self
            .recording_path(&status)
            .await
            .ok_or_else(|| ExtractionError::source_missing("could not determine the recording path"))?;
        let path = resolve_recording_file(&path)
            .ok_or_else(|| ExtractionError::source_missing(format!("no recording found at {:?}", path)))?;

        Ok(ActiveRecording { path, started_at })
    }
}

/// The controller may report the recording directory rather than the file;
/// in that case the newest video file in it is the active recording.
fn resolve_recording_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if !path.is_dir() {
        return None;
    }

    std::fs::read_dir(path)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| matchbox_common::paths::is_video_file(&entry.path()))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD;
    let secret = b64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    b64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

async fn exchange(
    ws: &mut WsStream,
    request_type: &str,
    request_id: &str,
    data: Option<Value>,
) -> Result<Value, ControllerError> {
    let mut d = json!({ "requestType": request_type, "requestId": request_id });
    if let Some(data) = data {
        d["requestData"] = data;
    }
    send_json(ws, json!({ "op": op::REQUEST, "d": d })).await?;

    loop {
        let (opcode, d) = read_message(ws).await?;
        if opcode != op::REQUEST_RESPONSE
            || d.get("requestId").and_then(Value::as_str) != Some(request_id)
        {
            continue;
        }

        let ok = d
            .pointer("/requestStatus/result")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !ok {
            return Err(ControllerError::Rejected {
                request_type: request_type.to_string(),
                code: d.pointer("/requestStatus/code").and_then(Value::as_i64).unwrap_or(0),
                comment: d
                    .pointer("/requestStatus/comment")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        return Ok(d.get("responseData").cloned().unwrap_or(Value::Null));
    }
}

async fn send_json(ws: &mut WsStream, value: Value) -> Result<(), ControllerError> {
    ws.send(Message::text(value.to_string()))
        .await
        .map_err(|e| ControllerError::Protocol(format!("send failed: {e}")))
}

/// Next JSON message as `(op, d)`.
async fn read_message(ws: &mut WsStream) -> Result<(u64, Value), ControllerError> {
    loop {
        let msg = ws
            .next()
            .await
            .ok_or(ControllerError::Closed)?
            .map_err(|e| ControllerError::Protocol(e.to_string()))?;

        match msg {
            Message::Text(text) => {
                let mut value: Value = serde_json::from_str(text.as_str())
                    .map_err(|e| ControllerError::Protocol(format!("invalid JSON: {e}")))?;
                let opcode = value
                    .get("op")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ControllerError::Protocol("message has no op".into()))?;
                return Ok((opcode, value["d"].take()));
            }
            Message::Close(frame) => {
                return Err(match frame {
                    Some(frame) if u16::from(frame.code) == CLOSE_AUTH_FAILED => {
                        ControllerError::Auth(frame.reason.as_str().to_string())
                    }
                    _ => ControllerError::Closed,
                });
            }
            _ => continue,
        }
    }
}

async fn read_op(ws: &mut WsStream, expected: u64) -> Result<Value, ControllerError> {
    let (opcode, d) = read_message(ws).await?;
    if opcode != expected {
        return Err(ControllerError::Protocol(format!(
            "expected op {expected}, got op {opcode}"
        )));
    }
    Ok(d)
}
