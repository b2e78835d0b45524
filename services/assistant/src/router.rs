//! HTTP routing of the control surface and its OpenAPI document.

use crate::{
    handlers,
    models::{
        ErrorResponse, EventsResponse, FittingRoomResponse, ListResponse, SendMessagePayload,
        TranscriptResponse,
    },
    preferences::{Preferences, PreferencesPatch},
    realtime::{SessionSnapshot, SessionStatus},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Json, Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_status,
        handlers::connect,
        handlers::disconnect,
        handlers::toggle,
        handlers::interrupt,
        handlers::send_message,
        handlers::get_transcript,
        handlers::toggle_transcript_item,
        handlers::hide_transcript_item,
        handlers::get_events,
        handlers::toggle_event,
        handlers::get_preferences,
        handlers::update_preferences,
        handlers::get_cart,
        handlers::get_wishlist,
        handlers::get_fitting_room,
    ),
    components(
        schemas(
            SessionSnapshot, SessionStatus, SendMessagePayload, TranscriptResponse, EventsResponse,
            ListResponse, FittingRoomResponse, Preferences, PreferencesPatch, ErrorResponse
        )
    ),
    tags(
        (name = "Shopping Assistant", description = "Local control surface of the storefront shopping assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/assistant/status", get(handlers::get_status))
        .route("/assistant/connect", post(handlers::connect))
        .route("/assistant/disconnect", post(handlers::disconnect))
        .route("/assistant/toggle", post(handlers::toggle))
        .route("/assistant/interrupt", post(handlers::interrupt))
        .route("/assistant/messages", post(handlers::send_message))
        .route("/assistant/transcript", get(handlers::get_transcript))
        .route(
            "/assistant/transcript/{id}/toggle",
            post(handlers::toggle_transcript_item),
        )
        .route(
            "/assistant/transcript/{id}/hide",
            post(handlers::hide_transcript_item),
        )
        .route("/assistant/events", get(handlers::get_events))
        .route("/assistant/events/{id}/toggle", post(handlers::toggle_event))
        .route(
            "/assistant/preferences",
            get(handlers::get_preferences).put(handlers::update_preferences),
        )
        .route("/cart", get(handlers::get_cart))
        .route("/wishlist", get(handlers::get_wishlist))
        .route("/fitting-room", get(handlers::get_fitting_room))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(api_router)
}
