//! Axum handlers of the local control surface.
//!
//! The storefront UI drives the assistant through these endpoints and
//! follows its state over `/ws`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use shopper_core::transcript::TranscriptItem;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{
        ErrorResponse, EventsResponse, FittingRoomResponse, ListResponse, SendMessagePayload,
        TranscriptResponse,
    },
    preferences::{Preferences, PreferencesPatch},
    realtime::{SessionError, SessionSnapshot, SessionStatus},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Records whether the assistant widget is open, so the next start can
/// reconnect. A failed write is logged and does not fail the request.
async fn remember_widget_open(state: &AppState, open: bool) {
    let patch = PreferencesPatch {
        widget_open: Some(open),
        ..Default::default()
    };
    if let Err(e) = state.preferences.update(patch).await {
        warn!(error = ?e, "Failed to persist the widget state.");
    }
}

fn session_error(err: SessionError) -> ApiError {
    match err {
        SessionError::EmptyMessage => ApiError::BadRequest(err.to_string()),
        SessionError::NotConnected => ApiError::Conflict(err.to_string()),
        other => ApiError::InternalServerError(other.into()),
    }
}

/// Current session state.
#[utoipa::path(
    get,
    path = "/assistant/status",
    responses((status = 200, description = "Session state", body = SessionSnapshot))
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.snapshot())
}

/// Start connecting. Ignored while a session is connecting or connected.
#[utoipa::path(
    post,
    path = "/assistant/connect",
    responses(
        (status = 202, description = "Connect requested", body = SessionSnapshot),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn connect(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.controller.connect().await.map_err(session_error)?;
    remember_widget_open(&state, true).await;
    Ok((StatusCode::ACCEPTED, Json(state.controller.snapshot())))
}

/// Tear the session down.
#[utoipa::path(
    post,
    path = "/assistant/disconnect",
    responses(
        (status = 200, description = "Disconnected", body = SessionSnapshot),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state.controller.disconnect().await.map_err(session_error)?;
    remember_widget_open(&state, false).await;
    Ok(Json(state.controller.snapshot()))
}

/// Connect when disconnected, disconnect otherwise.
#[utoipa::path(
    post,
    path = "/assistant/toggle",
    responses(
        (status = 200, description = "Toggled", body = SessionSnapshot),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn toggle(State(state): State<Arc<AppState>>) -> Result<Json<SessionSnapshot>, ApiError> {
    let opening = state.controller.snapshot().status == SessionStatus::Disconnected;
    state.controller.toggle().await.map_err(session_error)?;
    remember_widget_open(&state, opening).await;
    Ok(Json(state.controller.snapshot()))
}

/// Cancel the response being generated.
#[utoipa::path(
    post,
    path = "/assistant/interrupt",
    responses(
        (status = 204, description = "Response cancelled"),
        (status = 409, description = "Not connected", body = ErrorResponse)
    )
)]
pub async fn interrupt(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.controller.interrupt().await.map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send a typed message to the assistant.
#[utoipa::path(
    post,
    path = "/assistant/messages",
    request_body = SendMessagePayload,
    responses(
        (status = 202, description = "Message sent"),
        (status = 400, description = "Empty message", body = ErrorResponse),
        (status = 409, description = "Not connected", body = ErrorResponse)
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<StatusCode, ApiError> {
    state
        .controller
        .send_text(payload.text)
        .await
        .map_err(session_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// Visible transcript items.
#[utoipa::path(
    get,
    path = "/assistant/transcript",
    responses((status = 200, description = "Transcript", body = TranscriptResponse))
)]
pub async fn get_transcript(State(state): State<Arc<AppState>>) -> Json<TranscriptResponse> {
    let conversation = state.controller.conversation();
    let conversation = conversation.lock().await;
    let items = conversation
        .transcript
        .items()
        .iter()
        .filter(|item| !is_hidden(item))
        .cloned()
        .collect();
    Json(TranscriptResponse { items })
}

fn is_hidden(item: &TranscriptItem) -> bool {
    match item {
        TranscriptItem::Message(m) => m.hidden,
        TranscriptItem::Breadcrumb(b) => b.hidden,
    }
}

/// Expand or collapse a breadcrumb.
#[utoipa::path(
    post,
    path = "/assistant/transcript/{id}/toggle",
    params(("id" = String, Path, description = "Transcript item id")),
    responses(
        (status = 204, description = "Toggled"),
        (status = 404, description = "No such breadcrumb", body = ErrorResponse)
    )
)]
pub async fn toggle_transcript_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let conversation = state.controller.conversation();
    if conversation.lock().await.transcript.toggle_expand(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Breadcrumb {id} not found")))
    }
}

/// Hide a transcript item.
#[utoipa::path(
    post,
    path = "/assistant/transcript/{id}/hide",
    params(("id" = String, Path, description = "Transcript item id")),
    responses(
        (status = 204, description = "Hidden"),
        (status = 404, description = "No such item", body = ErrorResponse)
    )
)]
pub async fn hide_transcript_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let conversation = state.controller.conversation();
    if conversation.lock().await.transcript.hide(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Transcript item {id} not found")))
    }
}

/// Every protocol event sent or received.
#[utoipa::path(
    get,
    path = "/assistant/events",
    responses((status = 200, description = "Event history", body = EventsResponse))
)]
pub async fn get_events(State(state): State<Arc<AppState>>) -> Json<EventsResponse> {
    let conversation = state.controller.conversation();
    let events = conversation.lock().await.events.events().to_vec();
    Json(EventsResponse { events })
}

/// Expand or collapse a logged event.
#[utoipa::path(
    post,
    path = "/assistant/events/{id}/toggle",
    params(("id" = u64, Path, description = "Event id")),
    responses(
        (status = 204, description = "Toggled"),
        (status = 404, description = "No such event", body = ErrorResponse)
    )
)]
pub async fn toggle_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let conversation = state.controller.conversation();
    if conversation.lock().await.events.toggle_expand(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Event {id} not found")))
    }
}

#[utoipa::path(
    get,
    path = "/assistant/preferences",
    responses((status = 200, description = "Stored preferences", body = Preferences))
)]
pub async fn get_preferences(State(state): State<Arc<AppState>>) -> Json<Preferences> {
    Json(state.preferences.get().await)
}

/// Update preferences. Audio flags take effect on the live session at once.
#[utoipa::path(
    put,
    path = "/assistant/preferences",
    request_body = PreferencesPatch,
    responses(
        (status = 200, description = "Updated preferences", body = Preferences),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<PreferencesPatch>,
) -> Result<Json<Preferences>, ApiError> {
    let prefs = state.preferences.update(patch).await?;
    if let Some(enabled) = patch.microphone_enabled {
        state
            .controller
            .set_microphone(enabled)
            .await
            .map_err(session_error)?;
    }
    if let Some(enabled) = patch.speaker_enabled {
        state
            .controller
            .set_speaker_muted(!enabled)
            .await
            .map_err(session_error)?;
    }
    info!(?prefs, "Preferences updated.");
    Ok(Json(prefs))
}

#[utoipa::path(
    get,
    path = "/cart",
    responses((status = 200, description = "Cart contents", body = ListResponse))
)]
pub async fn get_cart(State(state): State<Arc<AppState>>) -> Json<ListResponse> {
    Json(ListResponse {
        entries: state.cart.entries(),
    })
}

#[utoipa::path(
    get,
    path = "/wishlist",
    responses((status = 200, description = "Wishlist contents", body = ListResponse))
)]
pub async fn get_wishlist(State(state): State<Arc<AppState>>) -> Json<ListResponse> {
    Json(ListResponse {
        entries: state.wishlist.entries(),
    })
}

#[utoipa::path(
    get,
    path = "/fitting-room",
    responses((status = 200, description = "Staged variants", body = FittingRoomResponse))
)]
pub async fn get_fitting_room(State(state): State<Arc<AppState>>) -> Json<FittingRoomResponse> {
    Json(FittingRoomResponse {
        variants: state.ui.staged(),
    })
}
