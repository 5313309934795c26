//! Ticket endpoint: exposes a [`BlobStoreGateway`] to Client Drivers.
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `/api/convert` | `POST {fileName}` | 200 `{uploadUrl, fileId, fileName, expiresAt}` |
//! | `/api/convert` | `OPTIONS` | 200, empty body |
//! | `/api/convert` | anything else | 405 `{error}` |
//! | `/healthz` | `GET` | 200 `ok` |
//!
//! The response's `fileName` is the storage key, which is what the
//! collaborator needs later. Gateway failures become a generic 500. The
//! underlying detail is logged here and never sent to the client.

use crate::error::GeoConvertError;
use crate::gateway::{BlobStoreGateway, ErrorBody, TicketRequest, TicketResponse};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

/// Path of the ticket endpoint.
pub const TICKET_PATH: &str = "/api/convert";

/// Settings for the ticket server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Origins allowed by CORS. `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn BlobStoreGateway>,
}

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Ticket(GeoConvertError),
    MethodNotAllowed,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => {
                debug!("Client error: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: message,
                        details: None,
                    },
                )
            }
            ApiError::Ticket(err) => {
                error!(
                    detail = err.diagnostic().unwrap_or(""),
                    "Ticket issuance failed: {}", err
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Failed to generate upload URL".to_string(),
                        details: None,
                    },
                )
            }
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                ErrorBody {
                    error: "Method not allowed".to_string(),
                    details: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the CORS layer for `allowed_origins`.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, GeoConvertError> {
    let origin = if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values = allowed_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>().map_err(|e| {
                    GeoConvertError::InvalidConfig(format!("invalid CORS origin '{o}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any))
}

/// Build the application router.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route(
            TICKET_PATH,
            post(issue_ticket)
                .options(|| async { StatusCode::OK })
                .fallback(|| async { ApiError::MethodNotAllowed }),
        )
        .route("/healthz", get(|| async { "ok" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `POST /api/convert`
///
/// The body is read to completion and then parsed as a whole.
#[instrument(skip_all)]
pub async fn issue_ticket(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TicketResponse>, ApiError> {
    let req: TicketRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;

    let file_name = req.file_name.trim();
    if file_name.is_empty() {
        return Err(ApiError::BadRequest("fileName is required".to_string()));
    }

    let ticket = state
        .gateway
        .issue_upload_ticket(file_name)
        .await
        .map_err(ApiError::Ticket)?;

    info!(
        file_id = %ticket.file_id,
        storage_key = %ticket.storage_key,
        "Issued upload URL"
    );
    Ok(Json(TicketResponse::from(&ticket)))
}

/// Serve the ticket endpoint until Ctrl-C.
pub async fn serve(config: ServerConfig, gateway: Arc<dyn BlobStoreGateway>) -> Result<(), GeoConvertError> {
    let cors = cors_layer(&config.allowed_origins)?;
    let app = router(AppState { gateway }, cors);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| GeoConvertError::InvalidConfig(format!("cannot bind {}: {e}", config.bind)))?;
    info!("Ticket endpoint listening on http://{}{}", config.bind, TICKET_PATH);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .map_err(|e| GeoConvertError::Internal(format!("server error: {e}")))
}
