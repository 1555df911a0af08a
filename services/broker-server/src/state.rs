use std::sync::Arc;

use broker_core::HubHandle;

use crate::handshake_auth::HandshakeAuth;

/// Shared axum state: a handle to post events to the hub, plus the
/// handshake-time auth collaborator. Cheap to clone — everything here is
/// already behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub handshake_auth: Arc<dyn HandshakeAuth>,
}

impl AppState {
    pub fn new(hub: HubHandle, handshake_auth: Arc<dyn HandshakeAuth>) -> Self {
        AppState { hub, handshake_auth }
    }
}
