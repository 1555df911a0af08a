//! Message-id deduplication (§4.2).
//!
//! The sweep is not a second mutating task: `Hub::run` ticks an interval
//! alongside its event queue in the same `select!` and calls
//! [`Deduper::sweep`] directly from the hub task, so the timestamp table
//! never needs a lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use broker_protocol::Message;

pub trait Deduper: Send {
    fn is_duplicate(&self, msg: &Message) -> bool;
    fn add(&mut self, msg: &Message);
    fn remove(&mut self, msg: &Message);
    fn sweep(&mut self);
    /// How often the hub should drive `sweep`.
    fn tick(&self) -> Duration;
}

/// In-memory reference implementation, ported from the original's
/// `StandardDeDuplication`: a timestamp per id, evicted once it's older
/// than `ttl`.
pub struct StandardDeduper {
    timestamps: HashMap<String, Instant>,
    ttl: Duration,
    tick: Duration,
}

impl StandardDeduper {
    pub fn new(tick: Duration, ttl: Duration) -> Self {
        StandardDeduper {
            timestamps: HashMap::new(),
            ttl,
            tick,
        }
    }
}

impl Deduper for StandardDeduper {
    fn is_duplicate(&self, msg: &Message) -> bool {
        self.timestamps.contains_key(&msg.id)
    }

    fn add(&mut self, msg: &Message) {
        self.timestamps.insert(msg.id.clone(), Instant::now());
    }

    fn remove(&mut self, msg: &Message) {
        self.timestamps.remove(&msg.id);
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.timestamps.retain(|_, seen_at| now.duration_since(*seen_at) <= ttl);
    }

    fn tick(&self) -> Duration {
        self.tick
    }
}
