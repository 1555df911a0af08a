//! Storage collaborator (§4.7): optional retention hook. Consulted by the
//! hub, never by connections directly.

use std::collections::HashMap;
use std::sync::Mutex;

use broker_protocol::Message;

use crate::connection::Connection;

pub trait Storage: Send + Sync {
    /// Called once per accepted `Write`-like event, before local fan-out.
    fn store(&self, sender: &dyn Connection, msg: &Message);

    /// Called once per successful per-subscriber delivery.
    fn sent_to(&self, sender: &dyn Connection, receiver: &dyn Connection, msg: &Message);
}

/// Reference implementation: a bounded ring of the last `limit` messages
/// per channel. Not meant for production use — ported from the original's
/// `SimpleStorage`, which carries the same disclaimer.
pub struct RingStorage {
    channels: Mutex<HashMap<String, Vec<Message>>>,
    limit: usize,
}

impl RingStorage {
    pub fn new(limit: usize) -> Self {
        RingStorage {
            channels: Mutex::new(HashMap::new()),
            limit,
        }
    }

    /// Snapshot of the retained messages for a channel, oldest first.
    pub fn get(&self, channel: &str) -> Vec<Message> {
        self.channels
            .lock()
            .expect("storage poisoned")
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

impl Storage for RingStorage {
    fn store(&self, _sender: &dyn Connection, msg: &Message) {
        let mut channels = self.channels.lock().expect("storage poisoned");
        let entry = channels.entry(msg.channel.clone()).or_default();
        entry.push(msg.clone());
        if entry.len() > self.limit {
            entry.remove(0);
        }
    }

    /// `SentTo` is a no-op in the reference implementation, matching the
    /// original's `SimpleStorage.SentTo`.
    fn sent_to(&self, _sender: &dyn Connection, _receiver: &dyn Connection, _msg: &Message) {}
}
