//! Shared-secret authentication for the HTTP(S) surface.
//!
//! A single static `X-Api-Key` header value, checked for an exact match
//! against the configured key. No sessions, no scopes — the agent has one
//! secret and one caller class.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// True if `headers` carries the configured key under `X-Api-Key`.
pub fn is_authorized(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|got| got == expected)
        .unwrap_or(false)
}

/// Rejects any request that doesn't carry the configured key. Applied to
/// every route except `/task/ping`, which checks the key itself so it can
/// answer unauthenticated callers too.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if is_authorized(request.headers(), &state.api_key) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accepts_matching_key() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(is_authorized(&headers, "secret"));
    }

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!is_authorized(&headers, "secret"));
    }

    #[test]
    fn rejects_wrong_key() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("wrong"));
        assert!(!is_authorized(&headers, "secret"));
    }
}
