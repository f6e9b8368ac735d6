use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thermocam_common::frame::FrameBuffer;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::stream::{StallSettings, StreamSession};

const PAGE: &str = "\
<html>
<head>
<title>Camera and Thermal Camera</title>
</head>
<body>
<h1>Camera and Thermal Camera</h1>
<img src=\"stream.mjpg\" width=\"640\" height=\"480\" />
<h2>Thermal Camera Output</h2>
<img src=\"thermal_stream.mjpg\" width=\"640\" height=\"480\" />
</body>
</html>
";

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub camera: FrameBuffer,
    pub thermal: FrameBuffer,
    pub stall: StallSettings,
    /// Cancelled on shutdown; open streams end when it fires.
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_redirect))
        .route("/index.html", get(index_page))
        .route("/stream.mjpg", get(camera_stream))
        .route("/thermal_stream.mjpg", get(thermal_stream))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /: permanent redirect to the page
async fn root_redirect() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/index.html")],
    )
}

/// GET /index.html
async fn index_page() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html")], PAGE)
}

/// GET /stream.mjpg: primary camera
async fn camera_stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Response {
    StreamSession::new(
        client,
        "camera",
        state.camera.subscribe(),
        state.stall,
        state.shutdown.clone(),
    )
    .into_response()
}

/// GET /thermal_stream.mjpg
async fn thermal_stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Response {
    StreamSession::new(
        client,
        "thermal",
        state.thermal.subscribe(),
        state.stall,
        state.shutdown.clone(),
    )
    .into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
