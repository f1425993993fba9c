use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::{AppState, SseMessage};

fn to_event(msg: &SseMessage) -> Event {
    let data = serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(msg.event_name()).data(data)
}

/// GET /api/events: SSE stream of `new_release` and `targets_changed` events.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.event_tx.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|msg| msg.ok().map(|m| Ok::<Event, Infallible>(to_event(&m))));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
