//! The hub: the single serialized dispatcher (§4.4).
//!
//! Exactly one task ever runs [`Hub::run`]. Every other task — connection
//! readers, the sister dialer, the pinger — only ever holds a [`HubHandle`]
//! and posts events. The channel table, the dedup table, and every
//! connection's channel set are mutated from nowhere else, which is the
//! system's only required synchronisation invariant (§9).

use std::collections::HashMap;
use std::sync::Arc;

use broker_protocol::{Message, Opcode};
use tokio::sync::mpsc;

use crate::auth::HubAuth;
use crate::connection::{Connection, ConnId};
use crate::deduper::Deduper;
use crate::sister::SisterManager;
use crate::storage::Storage;

/// One-to-one server query/response (§4.4, `Server` opcode). The handler
/// responds, if it wants to, by calling `conn.write` itself.
pub trait ServerHandler: Send + Sync {
    fn process(&self, conn: &dyn Connection, msg: &Message);
}

struct HubEvent {
    conn: Arc<dyn Connection>,
    message: Message,
    is_sister: bool,
}

/// The narrow interface connections are given: post an event, nothing
/// else. Mirrors the original's `HubConnection`, which exists specifically
/// to hide every other `Hub` method from callers that only need to write.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    pub fn post(&self, conn: Arc<dyn Connection>, message: Message, is_sister: bool) {
        let _ = self.sender.send(HubEvent { conn, message, is_sister });
    }

    /// Posts the synthetic cleanup event a connection's lifecycle emits
    /// exactly once, on the `Draining -> Closed` transition.
    pub fn clean_up(&self, conn: Arc<dyn Connection>) {
        self.post(conn, Message::clean_up(), false);
    }
}

pub struct Hub {
    channels: HashMap<String, Vec<Arc<dyn Connection>>>,
    deduper: Option<Box<dyn Deduper>>,
    auth: Arc<dyn HubAuth>,
    storage: Option<Arc<dyn Storage>>,
    server_handler: Option<Arc<dyn ServerHandler>>,
    sister_manager: Option<Arc<dyn SisterManager>>,
    receiver: mpsc::UnboundedReceiver<HubEvent>,
    self_handle: HubHandle,
}

impl Hub {
    pub fn new(
        deduper: Option<Box<dyn Deduper>>,
        auth: Arc<dyn HubAuth>,
        storage: Option<Arc<dyn Storage>>,
        server_handler: Option<Arc<dyn ServerHandler>>,
        sister_manager: Option<Arc<dyn SisterManager>>,
    ) -> (Hub, HubHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = HubHandle { sender };
        let hub = Hub {
            channels: HashMap::new(),
            deduper,
            auth,
            storage,
            server_handler,
            sister_manager,
            receiver,
            self_handle: handle.clone(),
        };
        (hub, handle)
    }

    /// Runs forever, processing events one at a time. Intended to be
    /// handed to `tokio::spawn`.
    pub async fn run(mut self) {
        let mut ticker = self.deduper.as_ref().map(|d| tokio::time::interval(d.tick()));

        loop {
            let event = match ticker.as_mut() {
                Some(ticker) => {
                    tokio::select! {
                        event = self.receiver.recv() => event,
                        _ = ticker.tick() => {
                            if let Some(deduper) = self.deduper.as_mut() {
                                deduper.sweep();
                            }
                            continue;
                        }
                    }
                }
                None => self.receiver.recv().await,
            };

            match event {
                Some(event) => self.dispatch(event),
                None => break,
            }
        }
    }

    fn dispatch(&mut self, event: HubEvent) {
        let HubEvent { conn, message, is_sister } = event;

        // Server/MetaQuery/MetaQueryResponse/CleanUp bypass the deduper (§9).
        let bypass_dedup = matches!(
            message.opcode,
            Opcode::CleanUp | Opcode::Server | Opcode::MetaQuery | Opcode::MetaQueryResponse
        );
        if !bypass_dedup && !message.id.is_empty() {
            if let Some(deduper) = self.deduper.as_mut() {
                if deduper.is_duplicate(&message) {
                    return;
                }
                deduper.add(&message);
            }
        }

        match message.opcode {
            Opcode::Bind => self.handle_bind(&conn, &message),
            Opcode::Unbind => self.handle_unbind(&conn, &message),
            Opcode::Write | Opcode::StreamStart | Opcode::StreamEnd | Opcode::StreamWrite => {
                self.handle_write(&conn, &message, is_sister)
            }
            Opcode::CleanUp => self.handle_clean_up(&conn),
            Opcode::Server => self.handle_server(&conn, &message),
            Opcode::MetaQuery => self.handle_meta_query(&conn, &message),
            Opcode::MetaQueryResponse => self.handle_meta_query_response(&message),
        }
    }

    fn handle_bind(&mut self, conn: &Arc<dyn Connection>, message: &Message) {
        if !self.auth.can_bind(conn.as_ref(), message) {
            return;
        }
        let subscribers = self.channels.entry(message.channel.clone()).or_default();
        if !subscribers.iter().any(|c| c.id() == conn.id()) {
            subscribers.push(conn.clone());
        }
        let mut channels = conn.channels();
        if !channels.iter().any(|c| c == &message.channel) {
            channels.push(message.channel.clone());
            conn.set_channels(channels);
        }
    }

    fn handle_unbind(&mut self, conn: &Arc<dyn Connection>, message: &Message) {
        self.remove_connection(&message.channel, conn.id());
        let mut channels = conn.channels();
        channels.retain(|c| c != &message.channel);
        conn.set_channels(channels);
    }

    fn handle_write(&mut self, conn: &Arc<dyn Connection>, message: &Message, is_sister: bool) {
        if !is_sister {
            if !self.auth.can_write(conn.as_ref(), message) {
                return;
            }
            if let Some(storage) = &self.storage {
                storage.store(conn.as_ref(), message);
            }
        }

        let mut dead = Vec::new();
        if let Some(subscribers) = self.channels.get(&message.channel) {
            for subscriber in subscribers {
                if subscriber.id() == conn.id() {
                    continue;
                }
                match subscriber.write(message) {
                    Ok(()) => {
                        if !is_sister {
                            if let Some(storage) = &self.storage {
                                storage.sent_to(conn.as_ref(), subscriber.as_ref(), message);
                            }
                        }
                    }
                    Err(_) => dead.push(subscriber.clone()),
                }
            }
        }
        for subscriber in dead {
            tracing::debug!(conn_id = %subscriber.id(), "evicting subscriber after failed write");
            self.self_handle.clean_up(subscriber);
        }

        if !is_sister {
            if let Some(sister_manager) = &self.sister_manager {
                sister_manager.write(message);
            }
        }
    }

    fn handle_clean_up(&mut self, conn: &Arc<dyn Connection>) {
        for channel in conn.channels() {
            self.remove_connection(&channel, conn.id());
        }
    }

    fn handle_server(&mut self, conn: &Arc<dyn Connection>, message: &Message) {
        if let Some(handler) = &self.server_handler {
            handler.process(conn.as_ref(), message);
        }
    }

    fn handle_meta_query(&mut self, conn: &Arc<dyn Connection>, message: &Message) {
        let Some(sister_manager) = &self.sister_manager else {
            return;
        };
        let response = Message::unchanneled(
            Opcode::MetaQueryResponse,
            message.id.clone(),
            sister_manager.meta_query_response(),
        );
        if let Err(err) = conn.write(&response) {
            tracing::warn!(conn_id = %conn.id(), error = %err, "failed to answer meta query");
        }
    }

    fn handle_meta_query_response(&mut self, message: &Message) {
        if let Some(sister_manager) = &self.sister_manager {
            sister_manager.handle_meta_query_response(&message.body);
        }
    }

    fn remove_connection(&mut self, channel: &str, conn_id: ConnId) {
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|c| c.id() != conn_id);
        }
    }
}
