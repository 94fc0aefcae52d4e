//! Resilient scoring feed client.
//!
//! A background task keeps a websocket open to the feed, reconnecting with
//! exponential backoff forever. Decoded events are delivered in receipt
//! order through [`EventStream::recv`]; undecodable messages are logged and
//! skipped.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use matchbox_common::BackoffPolicy;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::StreamError;
use crate::events::{self, FieldEvent};

const EVENT_BUFFER: usize = 256;
const KEEPALIVE_TEXT: &str = "ping";

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    /// Interval between keepalive messages.
    pub keepalive: Duration,
    /// Messages received this long after the first connection are replayed
    /// history and are discarded.
    pub backlog_drain: Duration,
    /// Reconnect policy; unbounded.
    pub reconnect: BackoffPolicy,
}

impl StreamSettings {
    pub fn from_config(config: &Config) -> Self {
        let scoring = &config.scoring;
        Self {
            url: feed_url(&scoring.host, scoring.port, &config.event_code),
            keepalive: Duration::from_secs(scoring.keepalive_secs.max(1)),
            backlog_drain: Duration::from_secs(scoring.backlog_drain_secs),
            reconnect: BackoffPolicy::unbounded(
                Duration::from_millis(scoring.reconnect_initial_ms),
                Duration::from_secs(scoring.reconnect_max_secs),
            ),
        }
    }
}

/// Websocket URL of the audience display command feed for an event.
pub fn feed_url(host: &str, port: u16, event_code: &str) -> String {
    format!("ws://{host}:{port}/stream/display/command/?code={event_code}")
}

pub struct EventStreamClient;

impl EventStreamClient {
    /// Start the connection task and return the event stream.
    pub fn connect(settings: StreamSettings) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (connected_tx, connected) = watch::channel(false);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(connection_loop(settings, tx, connected_tx, cancel.clone()));

        EventStream {
            rx,
            connected,
            cancel,
            handle,
        }
    }
}

/// Receiving end of the feed.
pub struct EventStream {
    rx: mpsc::Receiver<FieldEvent>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventStream {
    /// Next event, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<FieldEvent> {
        self.rx.recv().await
    }

    /// Connection status; `true` while a connection is open.
    pub fn status(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Close the connection and stop reconnecting.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("Event stream task failed: {}", e);
        }
    }
}

async fn connection_loop(
    settings: StreamSettings,
    tx: mpsc::Sender<FieldEvent>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut delays = settings.reconnect.delays();
    let mut failures = 0u32;
    let mut first_connection = true;

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(settings.url.as_str()) => result,
        };

        match attempt {
            Ok((ws, _)) => {
                tracing::info!("Connected to scoring feed at {}", settings.url);
                delays = settings.reconnect.delays();
                failures = 0;
                connected.send_replace(true);

                let drain = first_connection.then_some(settings.backlog_drain);
                first_connection = false;

                let result = session(ws, drain, &settings, &tx, &cancel).await;
                connected.send_replace(false);

                match result {
                    Ok(()) => break,
                    Err(e) => tracing::warn!("Scoring feed: {}", e),
                }
            }
            Err(e) => {
                let err = StreamError::Connect {
                    url: settings.url.clone(),
                    message: e.to_string(),
                };
                tracing::warn!("Scoring feed: {}", err);
            }
        }

        failures += 1;
        let delay = delays.next().unwrap_or(settings.reconnect.max_interval);
        tracing::debug!(?delay, attempt = failures, "Reconnecting to scoring feed");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("Scoring feed client stopped");
}

/// Pump one connection until it fails. `Ok` means stop for good: the
/// stream was closed locally or the consumer went away.
async fn session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    drain: Option<Duration>,
    settings: &StreamSettings,
    tx: &mpsc::Sender<FieldEvent>,
    cancel: &CancellationToken,
) -> Result<(), StreamError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = ws.split();

    let mut drain_until = drain.map(|d| Instant::now() + d);
    let mut drained = 0usize;
    let mut keepalive =
        tokio::time::interval_at(Instant::now() + settings.keepalive, settings.keepalive);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return Ok(());
            }
            _ = keepalive.tick() => {
                sink.send(Message::text(KEEPALIVE_TEXT))
                    .await
                    .map_err(|e| StreamError::Keepalive(e.to_string()))?;
            }
            msg = source.next() => {
                let msg = match msg {
                    None => return Err(StreamError::Disconnected("closed by server".to_string())),
                    Some(Err(e)) => return Err(StreamError::Disconnected(e.to_string())),
                    Some(Ok(msg)) => msg,
                };

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        return Err(StreamError::Disconnected("closed by server".to_string()))
                    }
                    _ => continue,
                };

                if let Some(until) = drain_until {
                    if Instant::now() < until {
                        drained += 1;
                        continue;
                    }
                    if drained > 0 {
                        tracing::info!("Discarded {} replayed message(s) from the feed backlog", drained);
                    }
                    drain_until = None;
                }

                match events::decode(text.as_str(), Utc::now()) {
                    Ok(Some(event)) => {
                        tracing::debug!(
                            field = %event.field,
                            kind = ?event.kind,
                            match_label = %event.match_label,
                            "Feed event"
                        );
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Skipping feed message: {} ({})", e, truncate(text.as_str(), 200)),
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
