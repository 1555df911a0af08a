//! Scenario 4 (§8): two broker processes connected as sisters federate a
//! write. B dials A as a sister; a write published on B reaches a client
//! bound to the same channel on A.

use std::sync::Arc;
use std::time::Duration;

use broker_core::{start_sister_manager, Hub, OpenAuth, SimpleSisterManager, SisterCandidate};
use broker_protocol::{Message, Opcode};
use broker_server::handshake_auth::OpenHandshakeAuth;
use broker_server::state::AppState;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/");
    let (stream, _response) = tokio_tungstenite::connect_async(url).await.expect("connect");
    stream
}

async fn send(stream: &mut WsStream, msg: &Message) {
    let bytes = msg.encode().expect("encode");
    stream.send(WsMessage::Binary(bytes.into())).await.expect("send");
}

async fn try_recv(stream: &mut WsStream, within: Duration) -> Option<Message> {
    loop {
        match tokio::time::timeout(within, stream.next()).await {
            Ok(Some(Ok(WsMessage::Binary(bytes)))) => return Some(Message::decode(&bytes).expect("decode")),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

/// Broker A never dials out; it only accepts the inbound sister connection
/// from B (classified by the `is_sister` header the dialer sets).
async fn spawn_plain_broker() -> std::net::SocketAddr {
    let (hub, hub_handle) = Hub::new(None, Arc::new(OpenAuth), None, None, None);
    tokio::spawn(hub.run());
    let state = AppState::new(hub_handle, Arc::new(OpenHandshakeAuth));
    let router = broker_server::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server error");
    });
    addr
}

/// Broker B is configured with a sister candidate pointing at `sister_addr`
/// and dials it on startup, exactly as the production binary does.
async fn spawn_federated_broker(sister_addr: std::net::SocketAddr) -> std::net::SocketAddr {
    let sister_manager = Arc::new(SimpleSisterManager::new(vec![SisterCandidate {
        url: format!("ws://{sister_addr}/"),
        headers: Vec::new(),
    }]));
    let sister_manager_dyn: Arc<dyn broker_core::SisterManager> = sister_manager.clone();

    let (hub, hub_handle) = Hub::new(None, Arc::new(OpenAuth), None, None, Some(sister_manager_dyn));
    tokio::spawn(hub.run());
    start_sister_manager(sister_manager, hub_handle.clone());

    let state = AppState::new(hub_handle, Arc::new(OpenHandshakeAuth));
    let router = broker_server::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server error");
    });
    addr
}

#[tokio::test]
async fn write_on_one_broker_is_delivered_on_its_sister() {
    let addr_a = spawn_plain_broker().await;
    let addr_b = spawn_federated_broker(addr_a).await;

    // Give B's dialer time to complete the sister handshake with A.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut c_a = connect(addr_a).await;
    let mut c_b = connect(addr_b).await;

    send(&mut c_a, &Message::new(Opcode::Bind, "", "r", Vec::new())).await;
    send(&mut c_b, &Message::new(Opcode::Bind, "", "r", Vec::new())).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    send(&mut c_b, &Message::new(Opcode::Write, "s1", "r", b"y".to_vec())).await;

    let received = try_recv(&mut c_a, Duration::from_millis(500)).await;
    let received = received.expect("write federated from B should reach a subscriber on A");
    assert_eq!(received.body, b"y".to_vec());

    // The message must not bounce back to the sender on B itself.
    assert!(try_recv(&mut c_b, Duration::from_millis(150)).await.is_none());
}
