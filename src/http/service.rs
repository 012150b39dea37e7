//! Request handling: admission middleware in front of the index handler.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::ratelimit::AdmissionBackend;

/// Header set by a trusted reverse proxy with the original client address.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Standard proxy chain header; the first entry is the originating client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Client identifier used when nothing better is available.
const UNKNOWN_CLIENT: &str = "unknown";

/// Body sent with rejected requests.
pub const REJECTED_BODY: &str = "Rate limit error";

/// Shared handle to the admission backend.
pub type SharedBackend = Arc<dyn AdmissionBackend>;

/// Build the application router.
///
/// Every path is served by the index handler, and every request passes the
/// admission middleware first.
pub fn router(backend: SharedBackend) -> Router {
    Router::new()
        .fallback(index)
        .layer(middleware::from_fn_with_state(backend, admission))
}

/// Reject the request with `423 Locked` unless the backend admits it.
#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn admission(
    State(backend): State<SharedBackend>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_id = client_id(request.headers(), peer);
    let resource_key = request.uri().path().to_string();

    if !backend.admit(&client_id, &resource_key) {
        debug!(
            client_id = %client_id,
            resource_key = %resource_key,
            "Rejecting rate limited request"
        );
        return (StatusCode::LOCKED, REJECTED_BODY).into_response();
    }

    next.run(request).await
}

async fn index() -> &'static str {
    "Success"
}

/// Resolve the client identifier for a request.
///
/// Prefers `X-Real-Ip`, then the first `X-Forwarded-For` entry, then the
/// peer address of the connection.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(real_ip) = header_value(headers, REAL_IP_HEADER) {
        return real_ip.to_string();
    }

    if let Some(first) = header_value(headers, FORWARDED_FOR_HEADER)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return first.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
