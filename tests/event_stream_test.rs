//! Scoring feed client against an in-process websocket server.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use matchbox::events::FieldEventKind;
use matchbox::stream::{feed_url, EventStream, EventStreamClient, StreamSettings};
use matchbox_common::BackoffPolicy;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

/// Accept websocket connections forever, handing each to `handler` with its index.
async fn feed_server<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handler(index, ws));
        }
    });

    (feed_url("127.0.0.1", port, "TESTEVT"), connections)
}

fn settings(url: String, backlog_drain: Duration) -> StreamSettings {
    StreamSettings {
        url,
        keepalive: Duration::from_secs(25),
        backlog_drain,
        reconnect: BackoffPolicy::unbounded(Duration::from_millis(10), Duration::from_millis(50)),
    }
}

fn start(field: u32, label: &str) -> String {
    serde_json::json!({
        "type": "START_MATCH",
        "params": { "field": field, "matchName": label }
    })
    .to_string()
}

fn end(field: u32, label: &str) -> String {
    serde_json::json!({
        "type": "END_MATCH",
        "params": { "field": field, "matchName": label }
    })
    .to_string()
}

async fn hold_open(ws: &mut WebSocketStream<TcpStream>) {
    while let Some(Ok(_)) = ws.next().await {}
}

async fn next_event(stream: &mut EventStream) -> matchbox::events::FieldEvent {
    timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for event")
        .expect("stream closed")
}

#[tokio::test]
async fn malformed_messages_are_skipped() {
    let (url, _) = feed_server(|_, mut ws| async move {
        for text in [
            "not json at all".to_string(),
            r#"{"params": {"field": 1}}"#.to_string(),
            r#"{"type": "START_MATCH", "params": {"field": 1}}"#.to_string(),
            "pong".to_string(),
            start(1, "Q1"),
        ] {
            ws.send(Message::text(text)).await.unwrap();
        }
        hold_open(&mut ws).await;
    })
    .await;

    let mut stream = EventStreamClient::connect(settings(url, Duration::ZERO));

    let event = next_event(&mut stream).await;
    assert_eq!(event.kind, FieldEventKind::MatchStart);
    assert_eq!(event.field.get(), 1);
    assert_eq!(event.match_label, "Q1");
    assert!(stream.is_connected());

    stream.close().await;
}

#[tokio::test]
async fn reconnects_and_keeps_receipt_order() {
    let (url, connections) = feed_server(|index, mut ws| async move {
        if index == 0 {
            ws.send(Message::text(start(2, "Q5"))).await.unwrap();
            ws.close(None).await.ok();
        } else {
            ws.send(Message::text(end(2, "Q5"))).await.unwrap();
            hold_open(&mut ws).await;
        }
    })
    .await;

    let mut stream = EventStreamClient::connect(settings(url, Duration::ZERO));

    let first = next_event(&mut stream).await;
    assert_eq!(first.kind, FieldEventKind::MatchStart);
    let second = next_event(&mut stream).await;
    assert_eq!(second.kind, FieldEventKind::MatchEnd);
    assert_eq!(second.match_label, "Q5");
    assert!(second.received_at >= first.received_at);

    assert!(connections.load(Ordering::SeqCst) >= 2);
    stream.close().await;
}

#[tokio::test]
async fn connection_status_is_published() {
    let (url, _) = feed_server(|_, mut ws| async move {
        ws.send(Message::text(start(1, "Q1"))).await.unwrap();
        hold_open(&mut ws).await;
    })
    .await;

    let mut stream = EventStreamClient::connect(settings(url, Duration::ZERO));
    let status = stream.status();

    next_event(&mut stream).await;
    assert!(*status.borrow());

    stream.close().await;
    assert!(!*status.borrow());
}

#[tokio::test]
async fn backlog_is_drained_on_first_connection_only() {
    let (url, _) = feed_server(|index, mut ws| async move {
        // Replayed history arrives immediately.
        ws.send(Message::text(start(1, "OLD"))).await.unwrap();
        ws.send(Message::text(end(1, "OLD"))).await.unwrap();
        if index == 0 {
            tokio::time::sleep(Duration::from_millis(400)).await;
            ws.send(Message::text(start(1, "NEW"))).await.unwrap();
            ws.close(None).await.ok();
        } else {
            hold_open(&mut ws).await;
        }
    })
    .await;

    let mut stream = EventStreamClient::connect(settings(url, Duration::from_millis(200)));

    let event = next_event(&mut stream).await;
    assert_eq!(event.match_label, "NEW");

    // After the reconnect nothing is discarded.
    let replayed = next_event(&mut stream).await;
    assert_eq!(replayed.match_label, "OLD");
    assert_eq!(replayed.kind, FieldEventKind::MatchStart);
    assert_eq!(next_event(&mut stream).await.kind, FieldEventKind::MatchEnd);

    stream.close().await;
}

#[tokio::test]
async fn sends_keepalive_pings() {
    let (ping_tx, mut ping_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (url, _) = feed_server(move |_, mut ws| {
        let ping_tx = ping_tx.clone();
        async move {
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = ping_tx.send(text.as_str().to_string());
                }
            }
        }
    })
    .await;

    let mut settings = settings(url, Duration::ZERO);
    settings.keepalive = Duration::from_millis(50);
    let stream = EventStreamClient::connect(settings);

    let text = timeout(WAIT, ping_rx.recv()).await.unwrap().unwrap();
    assert_eq!(text, "ping");

    stream.close().await;
}

#[tokio::test]
async fn keeps_retrying_while_feed_is_down() {
    // Reserve a port, then free it so connections are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let url = feed_url("127.0.0.1", port, "TESTEVT");
    let mut stream = EventStreamClient::connect(settings(url, Duration::ZERO));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!stream.is_connected());

    // Bring the feed up on the same port.
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        ws.send(Message::text(start(1, "Q9"))).await.unwrap();
        hold_open(&mut ws).await;
    });

    let event = next_event(&mut stream).await;
    assert_eq!(event.match_label, "Q9");
    stream.close().await;
}
