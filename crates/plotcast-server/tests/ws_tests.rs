//! End-to-end tests using a real `WebSocket` client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use plotcast_fanout::{FanoutHandle, FanoutManager};
use plotcast_server::{AppState, Server, ServerConfig};
use plotcast_types::{ConnectionId, Topic};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    fanout: FanoutHandle,
    state: Arc<AppState>,
    url: String,
    stop: Option<oneshot::Sender<()>>,
}

impl Harness {
    async fn start() -> Self {
        let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 64);
        let config = ServerConfig {
            host: String::from("127.0.0.1"),
            port: 0,
        };
        let state = Arc::new(AppState::new(fanout.clone()));
        let server = Server::bind(&config, Arc::clone(&state)).await.unwrap();
        let url = format!("ws://{}/ws", server.local_addr());
        let (stop, stopped) = oneshot::channel::<()>();
        drop(tokio::spawn(server.serve(async move {
            let _ = stopped.await;
        })));
        Self {
            fanout,
            state,
            url,
            stop: Some(stop),
        }
    }

    async fn connect(&self, client_id: &str) -> WsStream {
        let (ws, _) = connect_async(format!("{}?client_id={client_id}", self.url))
            .await
            .unwrap();
        ws
    }

    async fn wait_for_connections(&self, count: usize) {
        timeout(TIMEOUT, async {
            while self.fanout.stats().await.unwrap().connections != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count never settled");
    }

    async fn wait_for_clients(&self, count: usize) {
        let mut clients = self.state.watch_clients();
        timeout(TIMEOUT, clients.wait_for(|&live| live == count))
            .await
            .expect("client task count never settled")
            .unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn read_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

/// Read until the server closes the socket.
async fn read_until_closed(ws: &mut WsStream) {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            None | Some(Ok(Message::Close(_)) | Err(_)) => return,
            Some(Ok(_)) => {}
        }
    }
}

async fn subscribe(ws: &mut WsStream, topic: &str) -> String {
    let request = serde_json::json!({"msgtype": "subscribe", "topic": topic, "auth": "tok"});
    ws.send(Message::text(request.to_string())).await.unwrap();
    read_text(ws).await
}

#[tokio::test]
async fn subscribe_then_receive_broadcast() {
    let harness = Harness::start().await;
    let mut ws = harness.connect("c1").await;

    let reply = subscribe(&mut ws, "bokehplot:doc1").await;
    assert_eq!(
        reply,
        r#"bokehplot:doc1:{"msgtype":"status","status":["subscribesuccess","bokehplot:doc1","c1"]}"#
    );

    harness
        .fanout
        .broadcast(Topic::from("bokehplot:doc1"), "{\"patch\":1}", BTreeSet::new())
        .await
        .unwrap();
    assert_eq!(read_text(&mut ws).await, "bokehplot:doc1:{\"patch\":1}");
}

#[tokio::test]
async fn excluded_client_is_skipped() {
    let harness = Harness::start().await;
    let mut c1 = harness.connect("c1").await;
    let mut c2 = harness.connect("c2").await;
    subscribe(&mut c1, "T:x").await;
    subscribe(&mut c2, "T:x").await;

    harness
        .fanout
        .broadcast(
            Topic::from("T:x"),
            "first",
            BTreeSet::from([ConnectionId::from("c1")]),
        )
        .await
        .unwrap();
    harness
        .fanout
        .broadcast(Topic::from("T:x"), "second", BTreeSet::new())
        .await
        .unwrap();

    assert_eq!(read_text(&mut c1).await, "T:x:second");
    assert_eq!(read_text(&mut c2).await, "T:x:first");
    assert_eq!(read_text(&mut c2).await, "T:x:second");
}

#[tokio::test]
async fn malformed_request_keeps_socket_open() {
    let harness = Harness::start().await;
    let mut ws = harness.connect("c1").await;

    ws.send(Message::text("not valid json")).await.unwrap();
    let reply: serde_json::Value = serde_json::from_str(&read_text(&mut ws).await).unwrap();
    assert_eq!(reply["msgtype"], "error");

    let ok = subscribe(&mut ws, "T:x").await;
    assert!(ok.contains("subscribesuccess"));
}

#[tokio::test]
async fn closing_socket_removes_every_subscription() {
    let harness = Harness::start().await;
    let mut ws = harness.connect("c1").await;
    subscribe(&mut ws, "a:1").await;
    subscribe(&mut ws, "a:2").await;
    harness.wait_for_connections(1).await;

    ws.close(None).await.unwrap();
    harness.wait_for_connections(0).await;

    let stats = harness.fanout.stats().await.unwrap();
    assert!(stats.is_idle());
    assert!(
        harness
            .fanout
            .topics_of(ConnectionId::from("c1"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn reconnecting_under_the_same_id_takes_over_the_subscriptions() {
    let harness = Harness::start().await;
    let mut old = harness.connect("tab").await;
    subscribe(&mut old, "T:x").await;
    harness.wait_for_clients(1).await;

    let mut new = harness.connect("tab").await;
    read_until_closed(&mut old).await;
    harness.wait_for_clients(1).await;

    let stats = harness.fanout.stats().await.unwrap();
    assert_eq!(stats.connections, 1);
    assert_eq!(
        harness.fanout.topics_of(ConnectionId::from("tab")).await.unwrap(),
        vec![Topic::from("T:x")]
    );

    harness
        .fanout
        .broadcast(Topic::from("T:x"), "after", BTreeSet::new())
        .await
        .unwrap();
    assert_eq!(read_text(&mut new).await, "T:x:after");
}

#[tokio::test]
async fn disconnect_clients_leaves_the_fanout_idle() {
    let harness = Harness::start().await;
    let mut c1 = harness.connect("c1").await;
    let mut c2 = harness.connect("c2").await;
    subscribe(&mut c1, "a:1").await;
    subscribe(&mut c2, "a:2").await;
    harness.wait_for_clients(2).await;

    assert!(harness.state.disconnect_clients(TIMEOUT).await.unwrap());
    assert_eq!(harness.state.active_clients(), 0);
    assert!(harness.fanout.stats().await.unwrap().is_idle());
    read_until_closed(&mut c1).await;
    read_until_closed(&mut c2).await;
}
