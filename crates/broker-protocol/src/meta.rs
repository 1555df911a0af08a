//! JSON payload carried in the body of `MetaQuery`/`MetaQueryResponse` frames.
//! Everything else on the wire is opaque binary; this is the one place the
//! broker agrees on a schema with its sisters.

use serde::{Deserialize, Serialize};

/// Advertises this broker's federation state to a sister that asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaResponse {
    /// Number of sisters currently connected to the responder.
    pub count: usize,
}

impl MetaResponse {
    pub fn to_body(self) -> Vec<u8> {
        serde_json::to_vec(&self).unwrap_or_default()
    }

    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}
