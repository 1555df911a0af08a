//! Scenario 1 (§8): two clients bind the same channel; a write from one
//! reaches the other exactly once and never the sender.

use std::sync::Arc;
use std::time::Duration;

use broker_core::{Hub, OpenAuth, RingStorage};
use broker_protocol::{Message, Opcode};
use broker_server::handshake_auth::OpenHandshakeAuth;
use broker_server::state::AppState;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn spawn_broker() -> std::net::SocketAddr {
    let (hub, hub_handle) = Hub::new(None, Arc::new(OpenAuth), Some(Arc::new(RingStorage::new(16))), None, None);
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
            Ok(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_)))) => continue,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn write_reaches_other_subscriber_but_not_sender() {
    let addr = spawn_broker().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    send(&mut c1, &Message::new(Opcode::Bind, "", "room", Vec::new())).await;
    send(&mut c2, &Message::new(Opcode::Bind, "", "room", Vec::new())).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    send(&mut c2, &Message::new(Opcode::Write, "m1", "room", b"hi".to_vec())).await;

    let received = try_recv(&mut c1, Duration::from_millis(300)).await;
    assert_eq!(received.expect("c1 should receive the write").id, "m1");

    let c2_echo = try_recv(&mut c2, Duration::from_millis(150)).await;
    assert!(c2_echo.is_none(), "sender must not receive its own write back");
}
