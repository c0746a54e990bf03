use crate::server::AppContext;
use crate::state::Event as BusEvent;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// How often a `heartbeat` event is sent, starting on connect.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/events", get(events_handler))
}

pub async fn events_handler(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.events.subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event: BusEvent| {
            let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                format!(r#"{{"error": "serialization failed: {}"}}"#, e)
            });

            Ok(Event::default().data(data))
        });

    // First tick fires immediately, so clients see a heartbeat on connect
    let heartbeat = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        HEARTBEAT_INTERVAL,
    ))
    .map(|_| {
        Ok(Event::default()
            .event("heartbeat")
            .data(r#"{"type":"heartbeat"}"#))
    });

    let combined = stream.merge(heartbeat);

    Sse::new(combined).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
