//! Bearer-token authentication and origin allowlist.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`.
//! The WebSocket route carries the token differently and checks it itself,
//! so it is also exempt here. Browser requests must come from a local
//! origin.

use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

const OPEN_PATHS: &[&str] = &["/health", "/ws"];

fn origin_allowed(origin: &str) -> bool {
    origin.starts_with("http://localhost")
        || origin.starts_with("http://127.0.0.1")
        || origin.starts_with("tauri://")
        || origin.starts_with("app://")
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(origin) = request
        .headers()
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
    {
        if !origin_allowed(origin) {
            return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
        }
    }

    if OPEN_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|candidate| candidate == state.token)
        .unwrap_or(false);

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_allowlist() {
        assert!(origin_allowed("http://localhost:5173"));
        assert!(origin_allowed("http://127.0.0.1:8080"));
        assert!(origin_allowed("tauri://localhost"));
        assert!(!origin_allowed("https://evil.example.com"));
    }
}
