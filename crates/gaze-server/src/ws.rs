//! WebSocket event fan-out.
//!
//! One JSON text frame per event. The token arrives either as
//! `Sec-WebSocket-Protocol: gaze-token.<token>` or a `?token=` query
//! parameter. Control frames: `ping` is answered with `pong`, a periodic
//! `heartbeat` keeps intermediaries awake, and `auth_success` confirms the
//! handshake.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const PROTOCOL_PREFIX: &str = "gaze-token.";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(|protocols| {
            protocols
                .split(',')
                .map(str::trim)
                .find_map(|p| p.strip_prefix(PROTOCOL_PREFIX))
        })
        .map(str::to_string)
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let provided = token_from_headers(&headers).or(query.token);
    if provided.as_deref() != Some(state.token.as_str()) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }

    let subprotocol = token_from_headers(&headers)
        .map(|token| format!("{PROTOCOL_PREFIX}{token}"));
    let upgrade = match subprotocol {
        // Echo the selected subprotocol back per RFC 6455.
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };
    upgrade.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.engine.events().subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    let _ = socket
        .send(Message::Text(r#"{"type":"auth_success"}"#.to_string()))
        .await;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(frame) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("WebSocket client lagged, skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if socket
                    .send(Message::Text(r#"{"type":"heartbeat"}"#.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.contains("\"ping\"") => {
                        if socket
                            .send(Message::Text(r#"{"type":"pong"}"#.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    debug!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_protocol_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            "gaze-token.abc123".parse().unwrap(),
        );
        assert_eq!(token_from_headers(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_token_from_protocol_list() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            "something, gaze-token.xyz".parse().unwrap(),
        );
        assert_eq!(token_from_headers(&headers), Some("xyz".to_string()));
    }

    #[test]
    fn test_missing_token() {
        assert_eq!(token_from_headers(&HeaderMap::new()), None);
    }
}
