//! Live event feed for displays.
//!
//! A client first receives a `status` event carrying the full snapshot, then
//! one named event per [`AppEvent`]. `?field=N` drops events about other
//! fields. A client that falls behind the bus gets a fresh `status` instead
//! of the events it missed.

use crate::server::AppContext;
use crate::state::{AppEvent, StatusBoard};
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/api/events", get(events_handler))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub field: Option<u32>,
}

pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.status.subscribe();
    let initial = status_event(&ctx.status);
    let status = ctx.status.clone();

    let updates = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) => named_event(&event, filter.field),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            tracing::debug!("Event subscriber skipped {} events, resending status", missed);
            Some(status_event(&status))
        }
    });

    let stream = tokio_stream::once(initial).chain(updates).map(Ok);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn status_event(status: &StatusBoard) -> Event {
    Event::default()
        .event("status")
        .json_data(status.snapshot())
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// SSE event named after the `event_type` tag, or `None` when it concerns a
/// field other than `only_field`.
fn named_event(event: &AppEvent, only_field: Option<u32>) -> Option<Event> {
    let value = serde_json::to_value(event).ok()?;

    if let (Some(wanted), Some(field)) = (only_field, value.get("field").and_then(Value::as_u64)) {
        if field != u64::from(wanted) {
            return None;
        }
    }

    let name = value
        .get("event_type")
        .and_then(Value::as_str)
        .unwrap_or("message")
        .to_string();
    Some(Event::default().event(name).data(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchbox_common::FieldNumber;

    fn field(n: u32) -> FieldNumber {
        FieldNumber::new(n).unwrap()
    }

    #[test]
    fn test_field_filter() {
        let shown = AppEvent::FieldShown { field: field(1) };
        assert!(named_event(&shown, None).is_some());
        assert!(named_event(&shown, Some(1)).is_some());
        assert!(named_event(&shown, Some(2)).is_none());

        // Events without a field pass every filter.
        let connected = AppEvent::StreamConnection { connected: true };
        assert!(named_event(&connected, Some(2)).is_some());
    }
}
