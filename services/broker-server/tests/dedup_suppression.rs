//! Scenario 3 (§8): a duplicate message id is suppressed within the
//! deduper's TTL and accepted again once the sweep has evicted it. Uses a
//! short tick/ttl rather than the production 30s default so the test runs
//! quickly.

use std::sync::Arc;
use std::time::Duration;

use broker_core::{Hub, OpenAuth, StandardDeduper};
use broker_protocol::{Message, Opcode};
use broker_server::handshake_auth::OpenHandshakeAuth;
use broker_server::state::AppState;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn spawn_broker() -> std::net::SocketAddr {
    let deduper = Box::new(StandardDeduper::new(Duration::from_millis(30), Duration::from_millis(120)));
    let (hub, hub_handle) = Hub::new(Some(deduper), Arc::new(OpenAuth), None, None, None);
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

#[tokio::test]
async fn duplicate_id_suppressed_then_accepted_again_after_ttl() {
    let addr = spawn_broker().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    send(&mut c1, &Message::new(Opcode::Bind, "", "r", Vec::new())).await;
    send(&mut c2, &Message::new(Opcode::Bind, "", "r", Vec::new())).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    send(&mut c1, &Message::new(Opcode::Write, "dup", "r", b"a".to_vec())).await;
    send(&mut c1, &Message::new(Opcode::Write, "dup", "r", b"b".to_vec())).await;

    let first = try_recv(&mut c2, Duration::from_millis(300)).await.expect("first write observed");
    assert_eq!(first.body, b"a".to_vec());
    assert!(
        try_recv(&mut c2, Duration::from_millis(150)).await.is_none(),
        "second write with the same id must be dropped"
    );

    // Past ttl + tick the sweep has evicted the id; it is accepted again.
    tokio::time::sleep(Duration::from_millis(250)).await;
    send(&mut c1, &Message::new(Opcode::Write, "dup", "r", b"c".to_vec())).await;
    let third = try_recv(&mut c2, Duration::from_millis(300)).await.expect("id observed again after sweep");
    assert_eq!(third.body, b"c".to_vec());
}
