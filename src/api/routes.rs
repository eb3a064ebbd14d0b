use crate::api::proxy::forwarded_path;
use crate::api::{ApiError, AppState};
use crate::sandbox::{CreateSandboxRequest, Sandbox, SandboxError};
use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;

/// The only space served so far
pub const SUPPORTED_SPACE: &str = "default";

/// Prefix every tool route carries after the sandbox name
const TOOLS_PREFIX: &str = "tools:";

fn check_space(space: &str) -> Result<(), ApiError> {
    if space != SUPPORTED_SPACE {
        return Err(ApiError::unsupported_space(space));
    }
    Ok(())
}

/// GET /v1/healthz
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// POST /v1/spaces/:space/sandboxes
///
/// The body is decoded after the space check so an unsupported space always wins.
pub async fn create_sandbox(
    State(state): State<AppState>,
    Path(space): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Sandbox>), ApiError> {
    check_space(&space)?;

    let mut request: CreateSandboxRequest = serde_json::from_slice(&body)?;
    if request.spec.image.is_empty() {
        request.spec.image = state.default_image.clone();
    }

    let created = state
        .manager
        .create_sandbox(&space, request, state.cancel.clone().cancelled())
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(created.sandbox)))
}

/// GET /v1/spaces/:space/sandboxes/:name
pub async fn get_sandbox(
    State(state): State<AppState>,
    Path((space, name)): Path<(String, String)>,
) -> Result<Json<Sandbox>, ApiError> {
    check_space(&space)?;

    let found = state.manager.get_sandbox(&space, &name).await?;
    Ok(Json(found.sandbox))
}

/// DELETE /v1/spaces/:space/sandboxes/:name
pub async fn delete_sandbox(
    State(state): State<AppState>,
    Path((space, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    check_space(&space)?;

    state.manager.delete_sandbox(&space, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/spaces/:space/sandboxes/:name/tools:*
///
/// Forwards the request to the sandbox's box service with the `(space, name)` prefix
/// stripped from the path.
pub async fn proxy_to_sandbox(
    State(state): State<AppState>,
    Path((space, name, rest)): Path<(String, String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    if !rest.trim_start_matches('/').starts_with(TOOLS_PREFIX) {
        return Err(ApiError::NotFound("404 page not found".to_string()));
    }
    check_space(&space)?;

    let sandbox = state.manager.get_sandbox(&space, &name).await?;

    let path = forwarded_path(request.uri().path(), request.uri().query())
        .ok_or_else(|| ApiError::NotFound("404 page not found".to_string()))?;

    let base_url = sandbox.box_base_url();
    let forward = state.proxy.forward(&base_url, &path, request);

    tokio::select! {
        response = forward => response,
        _ = state.cancel.clone().cancelled() => {
            Err(ApiError::InternalError(format!("proxy: {}", SandboxError::Cancelled)))
        }
    }
}
