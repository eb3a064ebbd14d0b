//! Pass-through forwarding of tool calls into a sandbox.
//!
//! Method, headers and body are streamed to the box service unchanged and its response is
//! streamed back the same way. Only the path is rewritten by the caller.

use super::ApiError;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Connection-scoped headers that must not be forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Path (plus query) a proxied request is sent to inside the sandbox.
///
/// `/v1/spaces/{space}/sandboxes/{name}/tools:run` becomes `/tools:run`. The raw path is
/// split rather than rebuilt from decoded parameters so escaping is preserved.
pub fn forwarded_path(path: &str, query: Option<&str>) -> Option<String> {
    let (idx, _) = path.match_indices('/').nth(5)?;
    let mut forwarded = path[idx..].to_string();
    if let Some(q) = query {
        forwarded.push('?');
        forwarded.push_str(q);
    }
    Some(forwarded)
}

/// Streams requests to sandbox box services
#[derive(Debug, Clone)]
pub struct SandboxProxy {
    http: reqwest::Client,
}

impl SandboxProxy {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Send `request` to `base_url` + `path_and_query` and relay the response
    pub async fn forward(
        &self,
        base_url: &str,
        path_and_query: &str,
        request: Request,
    ) -> Result<Response, ApiError> {
        let (parts, body) = request.into_parts();
        let url = format!("{}{}", base_url, path_and_query);

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| ApiError::BadRequest(format!("unsupported method: {}", e)))?;

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        debug!("Proxying {} {}", method, url);

        let upstream = self
            .http
            .request(method, &url)
            .headers(headers)
            .body(stream_body(body))
            .send()
            .await
            .map_err(|e| ApiError::InternalError(format!("proxy to {}: {}", url, e)))?;

        relay_response(upstream)
    }
}

/// Pump an axum body into a stream reqwest can send
fn stream_body(body: Body) -> reqwest::Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(8);

    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(std::io::Error::other);
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

fn relay_response(upstream: reqwest::Response) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| ApiError::InternalError(format!("proxy: invalid upstream status: {}", e)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
