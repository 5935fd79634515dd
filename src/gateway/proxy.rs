//! Upstream streaming proxy.
//!
//! Matches the first path prefix after `/v1`, rewrites onto the
//! upstream's `/api/v1` surface, injects the identity headers and relays
//! the response body as a stream. The axum side speaks http 1.x types
//! while reqwest 0.11 speaks http 0.2, so names, values, methods and
//! status codes cross the boundary as bytes.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use super::auth::UserIdentity;
use crate::errors::AppError;

/// Request bodies are buffered before forwarding; masks arrive as base64
/// so the cap is generous.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Hop-by-hop headers that must not be relayed.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection", "content-length"];

/// Find the upstream for a path (already stripped of `/v1`). Returns the
/// base URL and the matched prefix.
pub fn resolve_route<'r>(
    routes: &'r [(String, String)],
    path: &str,
) -> Option<(&'r str, &'r str)> {
    routes
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix.as_str()))
        .map(|(prefix, upstream)| (upstream.as_str(), prefix.as_str()))
}

pub fn build_target(upstream: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{upstream}/api/v1{path}?{query}"),
        None => format!("{upstream}/api/v1{path}"),
    }
}

fn classify_transport_error(error: &reqwest::Error, service: &str) -> AppError {
    if error.is_connect() {
        AppError::UpstreamUnavailable {
            service: service.to_string(),
        }
    } else if error.is_timeout() {
        AppError::UpstreamTimeout {
            service: service.to_string(),
        }
    } else {
        AppError::internal(format!("proxy error: {error}"))
    }
}

pub async fn proxy_handler(
    State(state): State<super::GatewayState>,
    request: Request,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();
    let Some(rest) = path.strip_prefix("/v1") else {
        return Err(AppError::not_found("route", &path));
    };
    let (upstream, prefix) = resolve_route(&state.routes, rest)
        .ok_or_else(|| AppError::not_found("route", &path))?;
    let target = build_target(upstream, rest, request.uri().query());

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .map_err(|e| AppError::internal(format!("bad method: {e}")))?;
    let has_body = method == reqwest::Method::POST
        || method == reqwest::Method::PUT
        || method == reqwest::Method::PATCH;

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if name == axum::http::header::HOST {
            continue;
        }
        let converted = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        );
        if let (Ok(name), Ok(value)) = converted {
            headers.insert(name, value);
        }
    }
    if let Some(identity) = request.extensions().get::<UserIdentity>().cloned() {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&identity.user_id) {
            headers.insert("x-user-id", value);
        }
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&identity.role) {
            headers.insert("x-user-role", value);
        }
    }

    let service = prefix.trim_start_matches('/').to_string();
    let mut builder = state.client.request(method, &target).headers(headers);
    if has_body {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::internal(format!("failed to read request body: {e}")))?;
        builder = builder.body(bytes);
    }

    let upstream_response = builder
        .send()
        .await
        .map_err(|e| classify_transport_error(&e, &service))?;

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers() {
        if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let converted = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        );
        if let (Ok(name), Ok(value)) = converted {
            response_headers.insert(name, value);
        }
    }

    let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Vec<(String, String)> {
        vec![
            ("/auth".to_string(), "http://auth:8001".to_string()),
            ("/images".to_string(), "http://images:8002".to_string()),
            ("/tasks".to_string(), "http://images:8002".to_string()),
        ]
    }

    #[test]
    fn test_resolve_route_by_prefix() {
        let routes = routes();
        let (upstream, prefix) = resolve_route(&routes, "/images/generate").unwrap();
        assert_eq!(upstream, "http://images:8002");
        assert_eq!(prefix, "/images");

        let (upstream, _) = resolve_route(&routes, "/auth/login").unwrap();
        assert_eq!(upstream, "http://auth:8001");

        assert!(resolve_route(&routes, "/folders/list").is_none());
    }

    #[test]
    fn test_build_target_preserves_path_and_query() {
        assert_eq!(
            build_target("http://images:8002", "/images/generate", None),
            "http://images:8002/api/v1/images/generate"
        );
        assert_eq!(
            build_target("http://images:8002", "/gallery/", Some("page=2&limit=10")),
            "http://images:8002/api/v1/gallery/?page=2&limit=10"
        );
    }
}
