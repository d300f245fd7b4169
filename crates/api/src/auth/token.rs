//! Credential token extraction
//!
//! One routine serves every entry point (REST middleware and the WebSocket
//! handshake). Sources are checked in order and the first non-empty one wins:
//!
//! 1. handshake auth payload: `Sec-WebSocket-Protocol: access_token, <token>`
//! 2. `?token=` query parameter
//! 3. `Authorization: Bearer <token>`

use axum::http::{header, HeaderMap};

/// Subprotocol name that marks the token slot in `Sec-WebSocket-Protocol`
pub const HANDSHAKE_PROTOCOL: &str = "access_token";

pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    handshake_token(headers)
        .or_else(|| non_empty(query_token))
        .or_else(|| bearer_token(headers))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn handshake_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let mut parts = raw.split(',').map(str::trim);
    while let Some(part) = parts.next() {
        if part == HANDSHAKE_PROTOCOL {
            return non_empty(parts.next());
        }
    }
    None
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    non_empty(raw.strip_prefix("Bearer "))
}
