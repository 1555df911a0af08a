//! Sister Manager / Sister Connection (§4.5): outbound federation to peer
//! brokers.
//!
//! A sister connection is a normal [`Connection`] with `is_sister() ==
//! true` at both ends. It is dialed outbound with a reconnect-on-failure
//! loop grounded in the teacher's `UplinkSession::connect` (`connect_async`
//! over `tokio-tungstenite`), because federation correctness depends on
//! eventually reaching every configured sister rather than giving up after
//! one dropped socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_protocol::{meta::MetaResponse, Message};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::connection::{new_conn_id, Connection, ConnId, ConnectionState, WriteFailed};
use crate::hub::HubHandle;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Maximum time a single outbound write to a sister is allowed to take
/// (§4.3/§5). A sister that doesn't drain its socket within this window is
/// treated the same as a write error: the connection is unhealthy and gets
/// torn down.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// A configured peer to dial, with any headers the operator wants sent
/// alongside the upgrade (e.g. a shared federation secret).
#[derive(Debug, Clone)]
pub struct SisterCandidate {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

pub trait SisterManager: Send + Sync {
    /// Forward `msg` to every currently connected sister. Called by the hub
    /// after local fan-out of a non-sister `Write`.
    fn write(&self, msg: &Message);

    fn sister_connected(&self, conn: Arc<dyn Connection>);
    fn sister_disconnected(&self, conn: Arc<dyn Connection>);

    /// Payload advertising this broker's federation state, e.g. `{"count": N}`.
    fn meta_query_response(&self) -> Vec<u8>;
    fn handle_meta_query_response(&self, body: &[u8]);

    fn add_sister(&self, candidate: SisterCandidate);
    fn candidates(&self) -> Vec<SisterCandidate>;
}

/// Reference implementation ported from the original's
/// `SimpleMaxSisterManager`: a flat list of candidates and a flat list of
/// connected sisters, no rebalancing.
pub struct SimpleSisterManager {
    candidates: Mutex<Vec<SisterCandidate>>,
    connected: Mutex<Vec<Arc<dyn Connection>>>,
}

impl SimpleSisterManager {
    pub fn new(candidates: Vec<SisterCandidate>) -> Self {
        SimpleSisterManager {
            candidates: Mutex::new(candidates),
            connected: Mutex::new(Vec::new()),
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connected.lock().expect("sister manager poisoned").len()
    }
}

impl SisterManager for SimpleSisterManager {
    fn write(&self, msg: &Message) {
        let connected = self.connected.lock().expect("sister manager poisoned");
        for sister in connected.iter() {
            if let Err(err) = sister.write(msg) {
                // A dead sister write is logged and skipped (§4.4): the
                // reader loop on that connection will notice the drop and
                // tear it down on its own.
                tracing::warn!(conn_id = %sister.id(), error = %err, "sister write failed");
            }
        }
    }

    fn sister_connected(&self, conn: Arc<dyn Connection>) {
        let mut connected = self.connected.lock().expect("sister manager poisoned");
        if !connected.iter().any(|c| c.id() == conn.id()) {
            connected.push(conn);
        }
    }

    fn sister_disconnected(&self, conn: Arc<dyn Connection>) {
        let mut connected = self.connected.lock().expect("sister manager poisoned");
        connected.retain(|c| c.id() != conn.id());
    }

    fn meta_query_response(&self) -> Vec<u8> {
        MetaResponse {
            count: self.connected_count(),
        }
        .to_body()
    }

    fn handle_meta_query_response(&self, body: &[u8]) {
        match MetaResponse::from_body(body) {
            Some(meta) => tracing::debug!(sister_count = meta.count, "received sister meta response"),
            None => tracing::warn!("received malformed meta query response"),
        }
    }

    fn add_sister(&self, candidate: SisterCandidate) {
        self.candidates.lock().expect("sister manager poisoned").push(candidate);
    }

    fn candidates(&self) -> Vec<SisterCandidate> {
        self.candidates.lock().expect("sister manager poisoned").clone()
    }
}

/// An outbound connection to a peer broker. Implements the same
/// [`Connection`] capability set as a client connection so the hub cannot
/// tell them apart.
struct SisterConnection {
    id: ConnId,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl Connection for SisterConnection {
    fn id(&self) -> ConnId {
        self.id
    }

    fn is_sister(&self) -> bool {
        true
    }

    fn write(&self, msg: &Message) -> Result<(), WriteFailed> {
        let bytes = msg.encode().map_err(|_| WriteFailed)?;
        self.outbound
            .send(WsMessage::Binary(bytes.into()))
            .map_err(|_| WriteFailed)
    }

    fn channels(&self) -> Vec<String> {
        self.state.channels()
    }

    fn set_channels(&self, channels: Vec<String>) {
        self.state.set_channels(channels);
    }

    fn store(&self, key: &str, value: &str) {
        self.state.store(key, value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.state.get(key)
    }

    fn disconnect(&self) {
        let _ = self.outbound.send(WsMessage::Close(None));
    }
}

/// The `Start()` operation (§4.5): spawn one reconnecting dialer per
/// configured candidate. Free function rather than a trait method because
/// it needs an owned `Arc<dyn SisterManager>` to hand into each spawned
/// task.
pub fn start(manager: Arc<dyn SisterManager>, hub: HubHandle) {
    for candidate in manager.candidates() {
        tokio::spawn(run_sister_dialer(candidate, hub.clone(), manager.clone()));
    }
}

async fn run_sister_dialer(candidate: SisterCandidate, hub: HubHandle, manager: Arc<dyn SisterManager>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match dial(&candidate).await {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                run_connected_sister(stream, &hub, &manager).await;
            }
            Err(err) => {
                tracing::warn!(url = %candidate.url, error = %err, "failed to connect to sister, retrying");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

type SisterStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn dial(candidate: &SisterCandidate) -> Result<SisterStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = candidate.url.clone().into_client_request()?;
    request
        .headers_mut()
        .insert("is_sister", "true".parse().expect("static header value"));
    for (key, value) in &candidate.headers {
        if let (Ok(name), Ok(val)) = (
            tokio_tungstenite::tungstenite::http::HeaderName::try_from(key.as_str()),
            value.parse(),
        ) {
            request.headers_mut().insert(name, val);
        }
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn run_connected_sister(stream: SisterStream, hub: &HubHandle, manager: &Arc<dyn SisterManager>) {
    let (mut writer, mut reader) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let conn: Arc<dyn Connection> = Arc::new(SisterConnection {
        id: new_conn_id(),
        state: ConnectionState::new(),
        outbound: tx,
    });

    manager.sister_connected(conn.clone());
    tracing::info!(conn_id = %conn.id(), "sister connected");

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if !matches!(tokio::time::timeout(WRITE_WAIT, writer.send(msg)).await, Ok(Ok(()))) {
                break;
            }
        }
    });

    loop {
        match reader.next().await {
            Some(Ok(WsMessage::Binary(bytes))) => match Message::decode(&bytes) {
                Ok(message) => hub.post(conn.clone(), message, true),
                Err(err) => {
                    tracing::warn!(error = %err, "malformed frame from sister, draining connection");
                    break;
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {} // text/ping/pong carry no broker semantics
            Some(Err(err)) => {
                tracing::warn!(error = %err, "sister read error");
                break;
            }
        }
    }

    writer_task.abort();
    manager.sister_disconnected(conn.clone());
    hub.clean_up(conn.clone());
    tracing::info!(conn_id = %conn.id(), "sister disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_protocol::Opcode;

    #[test]
    fn meta_query_response_reports_connected_count() {
        let manager = SimpleSisterManager::new(Vec::new());
        let body = manager.meta_query_response();
        assert_eq!(MetaResponse::from_body(&body), Some(MetaResponse { count: 0 }));
    }

    #[test]
    fn add_sister_appends_candidate() {
        let manager = SimpleSisterManager::new(Vec::new());
        manager.add_sister(SisterCandidate {
            url: "ws://peer:9000".to_string(),
            headers: Vec::new(),
        });
        assert_eq!(manager.candidates().len(), 1);
    }

    #[test]
    fn handle_meta_query_response_tolerates_garbage() {
        let manager = SimpleSisterManager::new(Vec::new());
        manager.handle_meta_query_response(b"not json");
    }

    #[test]
    fn write_with_no_connected_sisters_is_a_noop() {
        let manager = SimpleSisterManager::new(Vec::new());
        let msg = Message::new(Opcode::Write, "id", "r", Vec::new());
        manager.write(&msg);
    }
}
