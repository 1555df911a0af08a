//! Transport entry point (§4.3, §6): accepts the WebSocket upgrade,
//! classifies client vs. sister via the handshake auth collaborator, and
//! drives the per-connection reader/writer tasks that feed the hub.
//!
//! This is the one place in the workspace that knows what a WebSocket is —
//! `broker_core` only ever sees the `Connection` capability interface.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use broker_core::{new_conn_id, Connection, ConnId, ConnectionState, WriteFailed};
use broker_protocol::Message as BrokerMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Time allowed to wait for a pong (or any other traffic) before the
/// connection is considered dead (§4.3).
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Send pings at this period. Must be less than `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_millis(PONG_WAIT.as_millis() as u64 * 9 / 10);
/// Maximum time a single outbound write is allowed to take (§4.3). A
/// subscriber that doesn't drain its socket within this window is treated
/// the same as a write error: the connection is unhealthy and gets cleaned up.
const WRITE_WAIT: Duration = Duration::from_secs(10);

pub async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !state.handshake_auth.is_valid(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let is_sister = state.handshake_auth.is_sister(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, headers, is_sister))
        .into_response()
}

/// A peer reached through our own WebSocket listener — either an ordinary
/// client or an inbound sister connection (a sister reached through
/// `broker_core::sister`'s outbound dialer is a different `Connection`
/// impl entirely).
struct ClientConnection {
    id: ConnId,
    is_sister: bool,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Connection for ClientConnection {
    fn id(&self) -> ConnId {
        self.id
    }

    fn is_sister(&self) -> bool {
        self.is_sister
    }

    fn write(&self, msg: &BrokerMessage) -> Result<(), WriteFailed> {
        let bytes = msg.encode().map_err(|_| WriteFailed)?;
        self.outbound.send(Message::Binary(bytes.into())).map_err(|_| WriteFailed)
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
        let _ = self.outbound.send(Message::Close(None));
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, headers: HeaderMap, is_sister: bool) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let conn: Arc<dyn Connection> = Arc::new(ClientConnection {
        id: new_conn_id(),
        is_sister,
        state: ConnectionState::new(),
        outbound: tx,
    });
    state.handshake_auth.conn_to_request(&headers, conn.as_ref());

    info!(conn_id = %conn.id(), is_sister, "connection accepted");

    // Pinger + writer: owns the sink exclusively, so a dropped outbound
    // sender (reader loop exiting) naturally drains it to completion.
    let writer_task = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(PING_PERIOD);
        ping_ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some(msg) => {
                            if !matches!(tokio::time::timeout(WRITE_WAIT, sink.send(msg)).await, Ok(Ok(()))) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    let ping = tokio::time::timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new().into()))).await;
                    if !matches!(ping, Ok(Ok(()))) {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    loop {
        match tokio::time::timeout(PONG_WAIT, stream.next()).await {
            Ok(Some(Ok(Message::Binary(bytes)))) => match BrokerMessage::decode(&bytes) {
                Ok(message) => state.hub.post(conn.clone(), message, is_sister),
                Err(err) => {
                    debug!(conn_id = %conn.id(), error = %err, "dropping malformed frame, draining connection");
                    break;
                }
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                info!(conn_id = %conn.id(), "connection closed by peer");
                break;
            }
            Ok(Some(Ok(_))) => {} // Ping/Pong/Text carry no broker semantics
            Ok(Some(Err(err))) => {
                warn!(conn_id = %conn.id(), error = %err, "transport read error");
                break;
            }
            Err(_) => {
                warn!(conn_id = %conn.id(), "no traffic within pong wait, timing out connection");
                break;
            }
        }
    }

    writer_task.abort();
    state.hub.clean_up(conn.clone());
    info!(conn_id = %conn.id(), "connection drained");
}
