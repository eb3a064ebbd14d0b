pub mod error;
pub mod proxy;
pub mod response;
pub mod routes;

use crate::sandbox::SandboxManager;
use crate::supervisor::ShutdownSignal;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

pub use error::{ApiError, ErrorDetail};
pub use proxy::SandboxProxy;
pub use response::*;

/// Versioned prefix of every route
pub const API_PREFIX: &str = "/v1";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
    pub proxy: SandboxProxy,
    /// Image used when a create request does not name one
    pub default_image: String,
    /// Fires when in-flight work must be abandoned (forced shutdown)
    pub cancel: ShutdownSignal,
    span: Span,
}

impl AppState {
    pub fn new(
        manager: Arc<SandboxManager>,
        http: reqwest::Client,
        default_image: String,
        cancel: ShutdownSignal,
        span: Span,
    ) -> Self {
        Self {
            manager,
            proxy: SandboxProxy::new(http),
            default_image,
            cancel,
            span,
        }
    }
}

/// HTTP front door for sandbox lifecycle and tool calls
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build Axum router with all endpoints
    pub fn build_routes(&self) -> AxumRouter {
        let sandboxes = format!("{}/spaces/:space/sandboxes", API_PREFIX);

        AxumRouter::new()
            .route(&format!("{}/healthz", API_PREFIX), get(routes::healthz))
            .route(&sandboxes, post(routes::create_sandbox))
            .route(
                &format!("{}/:name", sandboxes),
                get(routes::get_sandbox).delete(routes::delete_sandbox),
            )
            .route(
                &format!("{}/:name/*rest", sandboxes),
                post(routes::proxy_to_sandbox),
            )
            .layer(DefaultBodyLimit::max(1024 * 1024 * 10)) // 10MB
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                logging_middleware,
            ))
            .with_state(self.state.clone())
    }
}

/// Logging middleware
///
/// Every request runs in its own span under the server span; 5xx causes hidden from the
/// client are written here.
async fn logging_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let span = info_span!(parent: &state.span, "request", %method, path = %uri.path());

    async move {
        let response = next.run(request).await;
        let status = response.status();

        if status.is_server_error() {
            let detail = response
                .extensions()
                .get::<ErrorDetail>()
                .map(|d| d.0.as_str())
                .unwrap_or("-");
            error!("error serving request: {}: {}", uri.path(), detail);
        } else if status.is_client_error() {
            warn!("{} {} → {}", method, uri, status);
        } else {
            info!("{} {} → {}", method, uri, status);
        }

        response
    }
    .instrument(span)
    .await
}
