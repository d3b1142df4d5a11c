use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};

use crate::state::AppState;

/// Server-sent progress events. Each connection gets its own bounded queue;
/// a client that reads too slowly misses events instead of slowing requests.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.orchestrator.events().subscribe();
    tracing::info!(
        subscribers = state.orchestrator.events().subscriber_count(),
        "Event stream opened"
    );

    let events = stream::unfold(receiver, |mut receiver| async move {
        let event = receiver.recv().await?;
        let sse = Event::default()
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().comment(format!("unserializable event: {e}")));
        Some((Ok(sse), receiver))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
