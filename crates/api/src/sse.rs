use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::{self, Stream};
use services::notifier::{NotifierConnection, NotifierEvent};
use std::time::Duration;

use crate::{middleware::AuthenticatedUser, state::AppState};

/// Comment text sent on idle connections
pub const HEARTBEAT_TEXT: &str = "heartbeat";

fn event_frame(event: &NotifierEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event)
}

/// Turn a registered connection into an SSE stream.
///
/// The stream ends once the registration is replaced or evicted; dropping it releases
/// the registration unless a newer one took its place.
pub fn connection_stream(
    connection: NotifierConnection,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(connection, |mut connection| async move {
        let event = connection.recv().await?;
        tracing::debug!("Forwarding SSE event to user_id={}", connection.user_id());
        Some((event_frame(&event), connection))
    })
}

/// Subscription update stream for the authenticated user
///
/// Clients connect with `EventSource("/v1/subscriptions/events?token=<session_token>")`.
/// Each update arrives as a `data: <json>` frame; idle connections get a heartbeat comment.
#[utoipa::path(
    get,
    path = "/v1/subscriptions/events",
    tag = "Subscriptions",
    params(("token" = Option<String>, Query, description = "Session token when no Authorization header can be sent")),
    responses(
        (status = 200, description = "text/event-stream of subscription_updated events"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn subscription_events(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::info!("SSE connection opened: user_id={}", user.user_id);

    let connection = app_state.notifier.connect(user.user_id);
    event_stream(connection, app_state.sse_heartbeat)
}

/// SSE response for a connection with a heartbeat comment every `heartbeat`
pub fn event_stream(
    connection: NotifierConnection,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    Sse::new(connection_stream(connection))
        .keep_alive(KeepAlive::new().interval(heartbeat).text(HEARTBEAT_TEXT))
}
