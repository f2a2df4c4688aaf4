//! In-process server and client fixtures

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tpush::config::PushConfig;
use tpush::socket_server::{decode_batch, serve, ClientId, Dispatcher, Response, UserId};

/// How long any single wait in a test may take
pub const WAIT: Duration = Duration::from_secs(5);

/// A server bound to an ephemeral localhost port
pub struct TestServer {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
}

/// Bind to 127.0.0.1:0 and start accepting in the background
pub async fn start(mut config: PushConfig) -> TestServer {
    config.server.host = "127.0.0.1".to_string();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Arc::new(Dispatcher::new(config));
    tokio::spawn(serve(listener, Arc::clone(&dispatcher)));
    TestServer { addr, dispatcher }
}

impl TestServer {
    pub async fn connect(&self) -> TestClient {
        let url = format!("ws://{}{}", self.addr, self.dispatcher.config().server.path);
        let (ws, _) = connect_async(url).await.unwrap();
        TestClient { ws }
    }

    /// Poll until the registry holds exactly `count` sessions
    pub async fn wait_for_sessions(&self, count: usize) {
        let registry = Arc::clone(self.dispatcher.registry());
        timeout(WAIT, async move {
            while registry.stats().session_count != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {} session(s)", count));
    }
}

pub struct TestClient {
    pub ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn send_batch(&mut self, batch: Value) {
        self.ws.send(Message::Text(batch.to_string())).await.unwrap();
    }

    /// Next batch frame from the server; control frames are skipped.
    /// `None` once the server has closed the connection.
    pub async fn next_batch(&mut self) -> Option<Vec<Response>> {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame");
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Some(decode_batch(text.as_bytes()).unwrap());
                }
                Some(Ok(Message::Binary(data))) => return Some(decode_batch(&data).unwrap()),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            }
        }
    }

    /// Read until a response with `cmd` arrives and return it
    pub async fn expect_cmd(&mut self, cmd: &str) -> Response {
        let seen = self.collect_until(cmd).await;
        seen.into_iter().rev().find(|r| r.cmd == cmd).unwrap()
    }

    /// Read every response up to and including the first one with `cmd`
    pub async fn collect_until(&mut self, cmd: &str) -> Vec<Response> {
        let mut seen = Vec::new();
        loop {
            let batch = self
                .next_batch()
                .await
                .unwrap_or_else(|| panic!("connection closed before {:?} arrived", cmd));
            let found = batch.iter().position(|r| r.cmd == cmd);
            match found {
                Some(idx) => {
                    seen.extend(batch.into_iter().take(idx + 1));
                    return seen;
                }
                None => seen.extend(batch),
            }
        }
    }

    /// Send a WebSocket ping control frame
    pub async fn send_ws_ping(&mut self, payload: &[u8]) {
        self.ws.send(Message::Ping(payload.to_vec())).await.unwrap();
    }

    /// Payloads of every pong received before `window` elapses or the
    /// connection closes
    pub async fn collect_pongs(&mut self, window: Duration) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + window;
        let mut pongs = Vec::new();
        while let Ok(msg) = tokio::time::timeout_at(deadline, self.ws.next()).await {
            match msg {
                Some(Ok(Message::Pong(data))) => pongs.push(data),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
        pongs
    }
}

/// Log in and return the assigned client id
pub async fn login(client: &mut TestClient, uid: UserId) -> ClientId {
    client
        .send_batch(json!([{"cmd": "login", "seq": 1, "immed": true, "data": {"uid": uid}}]))
        .await;
    let rsp = client.expect_cmd("login").await;
    assert_eq!(rsp.code, 0, "login failed: {:?}", rsp);
    rsp.data["id"].as_i64().unwrap()
}
