//! Auth collaborator, handshake half (§4.6).
//!
//! `CanBind`/`CanWrite` run on the hub's hot path and live in
//! `broker_core::auth`; these three predicates run once, at upgrade time,
//! and need the raw request, so they live here instead.

use axum::http::HeaderMap;
use broker_core::Connection;

pub trait HandshakeAuth: Send + Sync {
    fn is_valid(&self, headers: &HeaderMap) -> bool;
    fn is_sister(&self, headers: &HeaderMap) -> bool;
    /// Copies handshake state (user id, token, ...) into `conn.storage`.
    fn conn_to_request(&self, headers: &HeaderMap, conn: &dyn Connection);
}

/// Accepts every handshake, classifies sisters solely from the
/// `is_sister: true` header, copies no claims. Exists so the broker is
/// runnable with zero configuration, mirroring the original's
/// `SimpleAuthClient`.
pub struct OpenHandshakeAuth;

impl HandshakeAuth for OpenHandshakeAuth {
    fn is_valid(&self, _headers: &HeaderMap) -> bool {
        true
    }

    fn is_sister(&self, headers: &HeaderMap) -> bool {
        headers
            .get("is_sister")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn conn_to_request(&self, _headers: &HeaderMap, _conn: &dyn Connection) {}
}
