use crate::action::Action;
use crate::bridge::{BridgeHost, OutboxItem, OverlayRow, RecorderControl, ViewUpdate};
use crate::capture::CaptureSession;
use crate::core::Engine;
use crate::host::{Modal, NowPlaying};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use stash_proto::job::{JobContext, JobRecord};
use stash_proto::protocol::SaveSettingsRequest;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<Engine>,
    pub bridge: BridgeHost,
}

#[derive(Serialize)]
struct ApiState {
    job: Option<JobRecord>,
    server_online: Option<bool>,
    destination: String,
    location: Option<JobContext>,
    capture: CaptureSession,
    modal: Option<Modal>,
}

#[derive(Debug, Deserialize)]
struct NowPlayingUpdate {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    context_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SliceUpload {
    generation: u64,
    /// Base64-encoded audio bytes.
    data: String,
    #[serde(default)]
    mime_type: Option<String>,
    /// Final slice of a stopped recorder.
    #[serde(default)]
    last: bool,
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorReply {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/view", post(post_view))
        .route("/api/overlay", get(get_overlay))
        .route("/api/now-playing", post(post_now_playing))
        .route("/api/action", post(post_action))
        .route("/api/outbox", get(get_outbox))
        .route("/api/capture", get(get_capture))
        .route("/api/capture/slice", post(post_capture_slice))
        .route("/api/state", get(get_state))
        .route("/api/settings", get(get_settings).post(post_settings))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    engine: Arc<Engine>,
    bridge: BridgeHost,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState { engine, bridge });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("Bridge API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// The adapter reports what it sees; the reply carries the overlay for the
/// rows it just reported, so a remounted list is repainted without waiting
/// for the next render tick.
async fn post_view(
    State(state): State<HttpState>,
    Json(update): Json<ViewUpdate>,
) -> Json<Vec<OverlayRow>> {
    state.bridge.apply_view(update);
    state.engine.render_now().await;
    Json(state.bridge.overlay())
}

async fn get_overlay(State(state): State<HttpState>) -> Json<Vec<OverlayRow>> {
    Json(state.bridge.overlay())
}

async fn post_now_playing(
    State(state): State<HttpState>,
    Json(update): Json<NowPlayingUpdate>,
) -> StatusCode {
    let now_playing = update
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .map(|name| NowPlaying {
            name,
            uri: update.uri,
            context_uri: update.context_uri,
        });
    debug!("HTTP API: now playing {:?}", now_playing);
    state.bridge.set_now_playing(now_playing.clone());
    state.engine.now_playing_changed(now_playing).await;
    StatusCode::NO_CONTENT
}

async fn post_action(State(state): State<HttpState>, Json(action): Json<Action>) -> StatusCode {
    info!("HTTP API: action {:?}", action);
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        engine.dispatch(action).await;
    });
    StatusCode::ACCEPTED
}

async fn get_outbox(State(state): State<HttpState>) -> Json<Vec<OutboxItem>> {
    Json(state.bridge.drain_outbox())
}

async fn get_capture(State(state): State<HttpState>) -> Json<RecorderControl> {
    Json(state.bridge.recorder_control())
}

async fn post_capture_slice(
    State(state): State<HttpState>,
    Json(slice): Json<SliceUpload>,
) -> Response {
    let data = match base64::engine::general_purpose::STANDARD.decode(slice.data.as_bytes()) {
        Ok(data) => data,
        Err(e) => return error_reply(StatusCode::BAD_REQUEST, format!("bad slice data: {}", e)),
    };
    if state
        .bridge
        .push_slice(slice.generation, data, slice.mime_type, slice.last)
    {
        StatusCode::NO_CONTENT.into_response()
    } else {
        debug!("HTTP API: dropped slice for recorder generation {}", slice.generation);
        error_reply(StatusCode::CONFLICT, "recorder is not running")
    }
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let engine = &state.engine;
    Json(ApiState {
        job: engine.jobs().snapshot().await,
        server_online: engine.server_online().await,
        destination: engine.destination().await,
        location: engine.current_context(),
        capture: engine.capture_session().await,
        modal: state.bridge.modal(),
    })
}

async fn get_settings(State(state): State<HttpState>) -> Response {
    match state.engine.settings().await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => {
            warn!("HTTP API: settings unavailable: {}", e);
            error_reply(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn post_settings(
    State(state): State<HttpState>,
    Json(request): Json<SaveSettingsRequest>,
) -> Response {
    match state.engine.save_settings(request).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!("HTTP API: saving settings failed: {}", e);
            error_reply(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
