//! HTTP Server for the Aggregator
//!
//! This module exposes the aggregator over HTTP using axum.
//!
//! - `GET /api/get?text=...` streams one record per registry entry, behind
//!   the admission controller
//! - `GET /__health` answers `OK` and is never throttled

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use markbench_common::protocol::error::{MarkbenchError, Result};
use markbench_common::rate_limit::{Admission, AdmissionController, DenyReason};
use markbench_common::transport::encode_record;
use markbench_common::ResultEnvelope;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use crate::aggregator::Aggregator;

/// Content type of the record stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// In-memory pipe between the record writer and the response body.
const STREAM_BUFFER: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    aggregator: Arc<Aggregator>,
    admission: AdmissionController,
}

#[derive(Debug, Deserialize)]
struct RenderQuery {
    text: Option<String>,
}

/// HTTP server for the aggregator.
pub struct HttpServer {
    state: AppState,
    cors: CorsLayer,
}

impl HttpServer {
    /// Creates a server accepting cross-origin GET requests from any origin.
    ///
    /// # Arguments
    /// * `aggregator` - The aggregator answering `/api/get`
    /// * `admission` - The controller gating `/api/get`
    pub fn new(aggregator: Arc<Aggregator>, admission: AdmissionController) -> Self {
        Self {
            state: AppState {
                aggregator,
                admission,
            },
            cors: CorsLayer::new().allow_methods([Method::GET]).allow_origin(Any),
        }
    }

    /// Restricts cross-origin requests to `origins`. An empty list keeps
    /// accepting any origin.
    pub fn with_cors_origins(mut self, origins: &[String]) -> Result<Self> {
        if origins.is_empty() {
            return Ok(self);
        }

        let origins = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| {
                    MarkbenchError::Configuration(format!("Invalid CORS origin {}: {}", origin, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.cors = CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_origin(AllowOrigin::list(origins));
        Ok(self)
    }

    /// Builds the axum application.
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/api/get", get(render))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                admission_gate,
            ));

        Router::new()
            .route("/__health", get(health_check))
            .merge(api)
            .layer(self.cors.clone())
            .with_state(self.state.clone())
    }

    /// Serves requests from an already bound listener.
    ///
    /// The client-table sweep runs for as long as the server does.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(
            "Aggregator HTTP server listening on {}",
            listener
                .local_addr()
                .map_err(|e| MarkbenchError::Transport(format!("Failed to get local addr: {}", e)))?
        );

        let sweeper = self.state.admission.spawn_sweeper();
        let app = self.router();

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| MarkbenchError::Transport(format!("Server error: {}", e)));

        sweeper.abort();
        served
    }

    /// Binds `addr` and serves requests until the server fails.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MarkbenchError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }
}

/// Resolves the identity the admission controller keys on.
///
/// `X-Forwarded-For` is used as-is, then a `REMOTE_ADDR` header, then the
/// TCP peer address.
fn client_identity(request: &Request) -> Option<String> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .or_else(|| header("remote_addr"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

async fn admission_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identity = client_identity(&request);

    match state.admission.admit(identity.as_deref()) {
        Admission::Allowed => next.run(request).await,
        Admission::Denied(reason) => denial_response(reason),
    }
}

/// A denied caller gets one ordinary-looking record carrying the message.
fn denial_response(reason: DenyReason) -> Response {
    match encode_record(&ResultEnvelope::rejection(reason.message())) {
        Ok(record) => ([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], record).into_response(),
        Err(e) => {
            error!("Failed to encode denial record: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn render(State(state): State<AppState>, Query(query): Query<RenderQuery>) -> Response {
    let text = query.text.unwrap_or_default();

    let dispatch = match state.aggregator.dispatch(&text).await {
        Ok(dispatch) => dispatch,
        Err(e) => {
            error!("Registry unavailable, refusing request: {}", e);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER);
    tokio::spawn(Aggregator::write_records(dispatch, writer));

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
