use affina_core::stream::{ClientEvent, ServerEvent};
use affina_overlay::config::ReconnectPolicy;
use affina_overlay::connection::{spawn_connection, ConnectionUpdate};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use url::Url;

const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const FAST_PING_OPEN: &str = r#"0{"sid":"eio-2","upgrades":[],"pingInterval":100,"pingTimeout":100,"maxPayload":1000000}"#;

type ServerSocket = WebSocketStream<TcpStream>;

fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
    }
}

fn stream_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("ws://{addr}/socket.io/?EIO=4&transport=websocket")).expect("url")
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (tcp, _) = listener.accept().await.expect("accept");
    accept_async(tcp).await.expect("ws upgrade")
}

/// Plays the server side of the Engine.IO open and Socket.IO connect.
async fn handshake(ws: &mut ServerSocket) {
    handshake_with(ws, OPEN).await;
}

async fn handshake_with(ws: &mut ServerSocket, open: &str) {
    ws.send(Message::Text(open.to_string())).await.expect("open");
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            if text == "40" {
                break;
            }
        }
    }
    ws.send(Message::Text(r#"40{"sid":"ns-1"}"#.to_string()))
        .await
        .expect("connect ack");
}

async fn next_update(rx: &mut mpsc::Receiver<ConnectionUpdate>) -> Option<ConnectionUpdate> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("update within timeout")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_ping_events_and_join() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (frames_tx, mut frames_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        ws.send(Message::Text("2".to_string())).await.expect("ping");
        ws.send(Message::Text(
            r#"42["log_update",{"logs":["Bot joined"]}]"#.to_string(),
        ))
        .await
        .expect("event");
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = frames_tx.send(text).await;
            }
        }
    });

    let (handle, mut updates) = spawn_connection(stream_url(addr), policy(3));
    assert_eq!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Connecting { attempt: 1 })
    );
    assert_eq!(next_update(&mut updates).await, Some(ConnectionUpdate::Connected));
    handle.send(ClientEvent::join("sess-1"));

    let Some(ConnectionUpdate::Event(ServerEvent::LogUpdate(payload))) =
        next_update(&mut updates).await
    else {
        panic!("expected log update")
    };
    assert_eq!(payload.lines().collect::<Vec<_>>(), vec!["Bot joined"]);

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let frame = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
            .await
            .expect("frame within timeout")
            .expect("server alive");
        seen.push(frame);
    }
    assert!(seen.contains(&"3".to_string()), "pong missing: {seen:?}");
    assert!(
        seen.contains(&r#"42["join_session",{"session_id":"sess-1"}]"#.to_string()),
        "join missing: {seen:?}"
    );

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let mut first = accept(&listener).await;
        handshake(&mut first).await;
        let _ = first.close(None).await;
        drop(first);

        let mut second = accept(&listener).await;
        handshake(&mut second).await;
        while let Some(Ok(_)) = second.next().await {}
    });

    let (handle, mut updates) = spawn_connection(stream_url(addr), policy(3));
    let expected = [
        ConnectionUpdate::Connecting { attempt: 1 },
        ConnectionUpdate::Connected,
        ConnectionUpdate::Disconnected,
        ConnectionUpdate::Connecting { attempt: 1 },
        ConnectionUpdate::Connected,
    ];
    for want in expected {
        assert_eq!(next_update(&mut updates).await, Some(want));
    }
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_server_is_dropped_and_reconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        // Accepts the first connection and then never sends another frame.
        let mut first = accept(&listener).await;
        handshake_with(&mut first, FAST_PING_OPEN).await;
        tokio::spawn(async move { while let Some(Ok(_)) = first.next().await {} });

        let mut second = accept(&listener).await;
        handshake(&mut second).await;
        while let Some(Ok(_)) = second.next().await {}
    });

    let (handle, mut updates) = spawn_connection(stream_url(addr), policy(3));
    let expected = [
        ConnectionUpdate::Connecting { attempt: 1 },
        ConnectionUpdate::Connected,
        ConnectionUpdate::Disconnected,
        ConnectionUpdate::Connecting { attempt: 1 },
        ConnectionUpdate::Connected,
    ];
    for want in expected {
        assert_eq!(next_update(&mut updates).await, Some(want));
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn connect_error_packet_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        loop {
            let mut ws = accept(&listener).await;
            ws.send(Message::Text(OPEN.to_string())).await.expect("open");
            let _ = ws.next().await;
            let _ = ws
                .send(Message::Text(r#"44{"message":"Not authorized"}"#.to_string()))
                .await;
        }
    });

    let (handle, mut updates) = spawn_connection(stream_url(addr), policy(1));
    assert_eq!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Connecting { attempt: 1 })
    );
    assert_eq!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Error("Not authorized".to_string()))
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn gives_up_after_bounded_attempts() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (handle, mut updates) = spawn_connection(stream_url(addr), policy(2));
    assert_eq!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Connecting { attempt: 1 })
    );
    assert!(matches!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Error(_))
    ));
    assert_eq!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Connecting { attempt: 2 })
    );
    assert!(matches!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Error(_))
    ));
    assert_eq!(
        next_update(&mut updates).await,
        Some(ConnectionUpdate::Error("gave up after 2 attempts".to_string()))
    );
    assert_eq!(next_update(&mut updates).await, None);
    handle.shutdown().await;
}
