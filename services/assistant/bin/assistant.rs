//! Main Entrypoint for the Shopping Assistant Service
//!
//! Loads configuration, builds the backend clients and the realtime session,
//! restores the stored preferences and serves the control surface until
//! Ctrl+C.

use anyhow::Context;
use realtime_rtc::{
    AudioSink, AudioSource, MicrophoneSource, NullSink, OggSink, RtcConnector, SilenceSource,
};
use shopper_assistant::{
    bootstrap::HttpBootstrap,
    catalog::HttpCatalog,
    config::Config,
    preferences::PreferenceStore,
    realtime::{ControllerSettings, SessionController, SessionDeps},
    router::create_router,
    state::AppState,
};
use shopper_core::{
    storefront::{ChannelUi, ItemList, MemoryList},
    tools::ToolRegistry,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Storefront Collaborators ---
    let catalog = Arc::new(
        HttpCatalog::new(&config.backend_url, &config.store_id, config.tool_timeout)
            .context("Failed to build the catalog client")?,
    );
    let cart: Arc<dyn ItemList> = Arc::new(MemoryList::new());
    let wishlist: Arc<dyn ItemList> = Arc::new(MemoryList::new());
    let ui = Arc::new(ChannelUi::new(64));
    let tools = ToolRegistry::new(catalog, cart.clone(), wishlist.clone(), ui.clone())
        .with_timeout(config.tool_timeout);

    // --- 4. Realtime Session ---
    let sink: Arc<dyn AudioSink> = match &config.record_audio_path {
        Some(path) => {
            info!(path = %path.display(), "Recording assistant audio.");
            Arc::new(OggSink::create(path).context("Failed to open the audio recording")?)
        }
        None => Arc::new(NullSink),
    };
    let source: Arc<dyn AudioSource> = if config.capture_microphone {
        Arc::new(MicrophoneSource::new(config.audio_input_device.clone()))
    } else {
        info!("Microphone capture disabled; the local track carries silence.");
        Arc::new(SilenceSource)
    };
    let preferences = Arc::new(PreferenceStore::load(&config.preferences_path).await);
    let prefs = preferences.get().await;

    let controller = SessionController::spawn(
        SessionDeps {
            bootstrap: Arc::new(HttpBootstrap::new(
                &config.backend_url,
                &config.store_id,
                config.signaling_timeout,
            )),
            connector: Arc::new(RtcConnector::new(config.rtc_settings(), source)),
            sink,
            tools,
        },
        ControllerSettings {
            connect_timeout: config.connect_timeout,
            max_attempts: config.max_connect_attempts,
            retry_delay: config.retry_delay,
            voice: config.realtime_voice.clone(),
            skip_device_check: !config.capture_microphone,
            microphone_enabled: prefs.microphone_enabled,
            speaker_muted: !prefs.speaker_enabled,
        },
    );
    if prefs.widget_open {
        info!("Assistant was open last time; reconnecting.");
        controller.connect().await?;
    }

    let app_state = Arc::new(AppState {
        controller: controller.clone(),
        preferences,
        ui,
        cart,
        wishlist,
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        store_id = %config.store_id,
        backend_url = %config.backend_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    controller.disconnect().await?;
    info!("Server has shut down.");
    Ok(())
}
