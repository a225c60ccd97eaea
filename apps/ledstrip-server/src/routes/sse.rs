use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_core::Stream;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::warn;

use crate::state::AppState;

/// Server-sent events mirroring every [`StripEvent`](crate::animation::StripEvent).
/// Slow subscribers skip what they missed rather than stalling the manager.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.animations.subscribe()).filter_map(|msg| match msg {
        Ok(event) => {
            let data = event.data_json().unwrap_or_else(|| "{}".into());
            Some(Ok(Event::default().event(event.name()).data(data)))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "event subscriber lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
