//! The `Connection` capability interface the hub dispatches against.
//!
//! A real client connection (the WebSocket upgrade handled in
//! `broker-server`) and a sister connection (§4.5, this crate) both
//! implement this trait, so the hub never knows which kind of peer it is
//! talking to. That's the whole point of modelling it as a narrow
//! capability set rather than a concrete struct.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use uuid::Uuid;

/// Opaque, never-reused-within-process identity for an accepted transport.
pub type ConnId = Uuid;

pub fn new_conn_id() -> ConnId {
    Uuid::new_v4()
}

/// Failure writing a message out to a peer. The hub treats any failure the
/// same way: evict the connection via a synthetic `CleanUp`.
#[derive(Debug)]
pub struct WriteFailed;

impl fmt::Display for WriteFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("write to connection failed")
    }
}

impl std::error::Error for WriteFailed {}

/// Capability set the hub needs from a peer, regardless of transport.
///
/// `channels`/`set_channels` and `store`/`get` are only ever called from the
/// hub's own task once the connection starts emitting hub events, so the
/// locking here is uncontended in practice; it exists only to satisfy
/// `Send + Sync` for connections shared behind `Arc<dyn Connection>`.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnId;

    /// Fixed at construction from the upgrade request.
    fn is_sister(&self) -> bool;

    /// Serialize `msg` with the wire codec and hand it to this peer's own
    /// writer. May fail; the hub treats failure as connection death.
    fn write(&self, msg: &broker_protocol::Message) -> Result<(), WriteFailed>;

    fn channels(&self) -> Vec<String>;
    fn set_channels(&self, channels: Vec<String>);

    fn store(&self, key: &str, value: &str);
    fn get(&self, key: &str) -> Option<String>;

    /// Idempotent. Stops background tasks, closes the transport. Does not
    /// itself post `CleanUp` to the hub — the caller (reader/pinger) does
    /// that once, on the transition into `Draining`.
    fn disconnect(&self);
}

/// Reusable inner state every `Connection` implementation embeds: the
/// channel set and the local string storage. Mirrors the original's
/// `connection.channels` / `connection.storage` fields exactly, just
/// wrapped for thread-safety since `Arc<dyn Connection>` may be cloned
/// across tasks (the writer task, the hub, the sister dialer).
pub struct ConnectionState {
    channels: Mutex<Vec<String>>,
    storage: Mutex<HashMap<String, String>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        ConnectionState {
            channels: Mutex::new(Vec::new()),
            storage: Mutex::new(HashMap::new()),
        }
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().expect("connection state poisoned").clone()
    }

    pub fn set_channels(&self, channels: Vec<String>) {
        *self.channels.lock().expect("connection state poisoned") = channels;
    }

    pub fn store(&self, key: &str, value: &str) {
        self.storage
            .lock()
            .expect("connection state poisoned")
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.storage.lock().expect("connection state poisoned").get(key).cloned()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_set_round_trips() {
        let state = ConnectionState::new();
        assert!(state.channels().is_empty());
        state.set_channels(vec!["room".to_string(), "lobby".to_string()]);
        assert_eq!(state.channels(), vec!["room".to_string(), "lobby".to_string()]);
    }

    #[test]
    fn storage_get_set() {
        let state = ConnectionState::new();
        assert_eq!(state.get("user"), None);
        state.store("user", "alice");
        assert_eq!(state.get("user"), Some("alice".to_string()));
    }
}
