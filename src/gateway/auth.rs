//! Bearer-token authentication at the edge.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::TOKEN_KIND_ACCESS;
use crate::errors::AppError;

/// Prefixes reachable without credentials. Root is an exact match; the
/// rest are prefixes.
const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/docs",
    "/openapi.json",
    "/v1/auth/login",
    "/v1/auth/register",
    "/v1/auth/refresh",
];

pub fn is_public(path: &str) -> bool {
    path == "/" || PUBLIC_PATHS.iter().any(|prefix| path.starts_with(prefix))
}

/// Identity attached to the request once the token verifies; the proxy
/// turns it into upstream headers.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub role: String,
}

pub async fn auth_middleware(
    State(state): State<super::GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AppError::unauthorized("Missing or invalid authorization header").into_response();
    };

    let claims = match state.tokens.decode_token_of_kind(token, TOKEN_KIND_ACCESS) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("Token validation failed: {}", e);
            return AppError::unauthorized("Invalid or expired token").into_response();
        }
    };

    request.extensions_mut().insert(UserIdentity {
        user_id: claims.sub.clone(),
        role: claims.role.clone(),
    });

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public("/"));
        assert!(is_public("/health"));
        assert!(is_public("/docs"));
        assert!(is_public("/v1/auth/login"));
        assert!(is_public("/v1/auth/register"));
        assert!(is_public("/v1/auth/refresh"));
    }

    #[test]
    fn test_protected_paths() {
        assert!(!is_public("/v1/images/generate"));
        assert!(!is_public("/v1/auth/me"));
        assert!(!is_public("/v1/tasks/abc"));
        assert!(!is_public("/v1/gallery/"));
    }
}
