//! Per-user server-sent event stream of pipeline progress.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};

use crate::auth::CallerId;
use crate::error::ErrorResponse;
use crate::state::AppState;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[utoipa::path(
    get,
    path = "/events",
    tag = "events",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user")
    ),
    responses(
        (status = 200, description = "Event stream; `event` is the event type, `data` its JSON payload", content_type = "text/event-stream"),
        (status = 401, description = "Missing caller identity", body = ErrorResponse)
    )
)]
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.notifier.subscribe(caller.0);
    tracing::debug!(user_id = %caller.0, "Event stream opened");

    // The subscription unregisters itself when the client goes away and the stream drops.
    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let sse = Event::default()
            .event(event.event_type)
            .data(event.payload.to_string());
        Some((Ok(sse), subscription))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
