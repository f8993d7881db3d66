use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::Coordinator;
use crate::error::{FarmError, Result};

#[derive(Clone)]
pub struct ServerState {
    pub coordinator: Arc<Coordinator>,
    pub client_timeout: Duration,
}

/// Routes: `POST /` for the client/manager protocol, `GET /api/status` for
/// the operator overview.
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(protocol_handler))
        .route("/api/status", get(status_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Coordinator listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}

async fn protocol_handler(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: String,
) -> Response {
    match state.coordinator.dispatch(&body, peer).await {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(e @ FarmError::MalformedRequest(_)) => {
            tracing::warn!(peer = %peer, error = %e, "Rejected malformed request");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e @ FarmError::UnknownRequest(_)) => {
            tracing::warn!(peer = %peer, error = %e, "Rejected unknown request");
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(peer = %peer, error = %e, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(
        state
            .coordinator
            .overview(Utc::now(), state.client_timeout)
            .await,
    )
}
