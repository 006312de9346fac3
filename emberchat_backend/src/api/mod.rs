mod files;
mod realtime;

use crate::config::EmberchatConfig;
use crate::files::{FileStore, StoreError};
use crate::hub::ConnectionHub;
use crate::notify::Notifier;
use anyhow::Result;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: EmberchatConfig,
    pub hub: ConnectionHub,
    pub store: FileStore,
    pub notifier: Notifier,
}

pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn into_response_parts(self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse { message: msg }),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse { message: msg }),
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        message: "internal server error".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_response_parts();
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyPayload
            | StoreError::InvalidName(_)
            | StoreError::UnknownScope(_) => ApiError::BadRequest(err.to_string()),
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Io(_) => ApiError::Internal(anyhow::Error::new(err)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connected_clients: usize,
    pending_messages: usize,
}

async fn health_handler(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "ok",
        connected_clients: state.hub.connected_clients().await,
        pending_messages: state.hub.pending_messages().await,
    }))
}

/// Tries to bind to the given port, or finds the next available port
async fn find_available_port(start_port: u16) -> Result<(TcpListener, u16)> {
    const MAX_PORT_ATTEMPTS: u16 = 100;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port + offset;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => {
                if offset == 0 {
                    tracing::debug!(port, error = %e, "Port in use, trying next port");
                }
                continue;
            }
        }
    }

    anyhow::bail!(
        "Could not find available port in range {}-{}",
        start_port,
        start_port + MAX_PORT_ATTEMPTS - 1
    )
}

pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.file.max_upload_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(realtime::ws_handler))
        .route("/uploads", post(files::upload_blob))
        .route("/files/:name", get(files::serve_file))
        .route("/admin/files", get(files::list_files))
        .route("/admin/files/clear", post(files::clear_files))
        .route("/admin/files/:name", delete(files::delete_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes as usize))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve_http(
    config: EmberchatConfig,
    hub: ConnectionHub,
    store: FileStore,
    notifier: Notifier,
) -> Result<()> {
    let state = AppState {
        config: config.clone(),
        hub,
        store,
        notifier,
    };

    let router = build_router(state);

    // Try to bind to the configured port, or find the next available port
    let (listener, actual_port) = find_available_port(config.api_port).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], actual_port));

    if actual_port != config.api_port {
        tracing::warn!(
            requested_port = config.api_port,
            actual_port = actual_port,
            "Configured port was in use, bound to next available port"
        );
    }

    tracing::info!(?addr, "HTTP server listening");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
