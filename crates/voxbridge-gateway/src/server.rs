//! Axum-based HTTP and media WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::connection::handle_media_socket;
use crate::state::GatewayState;
use crate::twiml;

/// All gateway routes.
pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/twiml", post(twiml_handler))
        .route("/media", get(media_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the gateway and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn twiml_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    let host = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.public_host.clone())
        .or_else(|| header_value(&headers, "x-original-host"))
        .or_else(|| header_value(&headers, header::HOST.as_str()));

    let Some(host) = host else {
        warn!("Call-setup request without a usable host");
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };
    match twiml::stream_document(&host) {
        Ok(doc) => ([(header::CONTENT_TYPE, "application/xml")], doc).into_response(),
        Err(e) => {
            error!("Failed to build call-setup TwiML: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_socket(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let calls = state.call_count().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "calls": calls,
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
