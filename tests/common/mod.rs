#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use chiplink::api::{self, AppState, RouterConfig, TransportConfig};
use chiplink::dispatch::{DispatchConfig, Dispatcher};
use chiplink::session::SessionRegistry;
use chiplink::tool::ChipTool;

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A stand-in for `chip-tool` that answers the invocations the bridge makes
/// with canned transcripts.
pub const FAKE_CHIP_TOOL: &str = r#"#!/bin/sh
case "$1 $2" in
  "--version ")
    echo "chip-tool fake 1.0"
    ;;
  "discover commissionables")
    echo "[1700000000.100] [11:12] [DIS] Discovered commissionable/commissioner node:"
    echo "[1700000000.100] [11:12] [DIS]    Hostname: 0E6A9B1C2D3E4F50"
    echo "[1700000000.100] [11:12] [DIS]    IP Address #1: fe80::1"
    echo "[1700000000.100] [11:12] [DIS]    Port: 5540"
    echo "[1700000000.100] [11:12] [DIS]    Vendor ID: 65521"
    echo "[1700000000.100] [11:12] [DIS]    Product ID: 32769"
    echo "[1700000000.100] [11:12] [DIS]    Long Discriminator: 3840"
    echo "[1700000000.100] [11:12] [DIS]    Commissioning Mode: 1"
    echo "[1700000000.100] [11:12] [DIS]    Instance Name: 5A1B2C3D4E5F6071"
    echo "[1700000000.200] [11:12] [DIS] Discovered commissionable/commissioner node:"
    echo "[1700000000.200] [11:12] [DIS]    Vendor ID: 4447"
    echo "[1700000000.200] [11:12] [DIS]    Product ID: 1"
    echo "[1700000000.200] [11:12] [DIS]    Long Discriminator: 1234"
    echo "[1700000000.200] [11:12] [DIS]    Commissioning Mode: 2"
    ;;
  "onoff on"|"onoff off"|"onoff toggle")
    echo "[1700000001.000] [11:12] [DMG] Received Command Response Status for Endpoint=$4 Cluster=0x0000_0006 Status=0x0"
    ;;
  "onoff read")
    echo "[1700000001.100] [11:12] [TOO] Endpoint: $5 Cluster: 0x0000_0006 Attribute 0x0000_0000 DataVersion: 1"
    echo "[1700000001.100] [11:12] [TOO]   Value = true"
    ;;
  "onoff subscribe")
    echo $$ > "$(dirname "$0")/subscribe.pid"
    echo "[1700000002.000] [11:12] [DMG] ReportDataMessage ="
    echo "[1700000002.000] [11:12] [DMG] {"
    echo "[1700000002.000] [11:12] [DMG]     Data = false (BOOLEAN),"
    echo "[1700000002.000] [11:12] [DMG] }"
    exec sleep 30
    ;;
  "levelcontrol movetolevel")
    echo "CHIP Error 0x00000032: Timeout" >&2
    ;;
  *)
    echo "Error: unsupported invocation: $*" >&2
    exit 1
    ;;
esac
"#;

/// Write the fake tool into `dir` and make it executable.
pub fn install_fake_tool(dir: &Path) -> PathBuf {
    let path = dir.join("chip-tool");
    std::fs::write(&path, FAKE_CHIP_TOOL).expect("write fake chip-tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake chip-tool");
    path
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub sessions: SessionRegistry,
    pub shutdown: CancellationToken,
    /// Holds the fake tool; dropped with the server.
    pub dir: tempfile::TempDir,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Pid of the last `subscribe` the fake tool served.
    pub fn subscribe_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.dir.path().join("subscribe.pid"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

pub async fn start_server() -> TestServer {
    start_server_with_limit(None).await
}

pub async fn start_server_with_limit(max_sessions: Option<usize>) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let tool = ChipTool::new(install_fake_tool(dir.path()));

    let shutdown = CancellationToken::new();
    let sessions = SessionRegistry::with_limits(shutdown.clone(), 64, max_sessions);
    let config = DispatchConfig {
        discovery_timeout: Duration::from_secs(5),
        command_timeout: Some(Duration::from_secs(5)),
        ..DispatchConfig::default()
    };
    let state = AppState {
        sessions: sessions.clone(),
        dispatcher: Arc::new(Dispatcher::new(Arc::new(tool), config)),
        transport: TransportConfig::default(),
        shutdown: shutdown.clone(),
    };
    let app = api::router(state, RouterConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stopped = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stopped.cancelled().await })
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        sessions,
        shutdown,
        dir,
    }
}

pub async fn connect(server: &TestServer) -> (WsSink, WsStream) {
    let (ws, _) = connect_async(server.ws_url()).await.expect("connect");
    ws.split()
}

pub async fn send_json(tx: &mut WsSink, value: serde_json::Value) {
    tx.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Receive the next text frame as JSON, skipping control frames.
pub async fn recv_json(rx: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text message, got {:?}", other),
        }
    }
}

/// Receive frames until one of type `kind` arrives, returning it.
pub async fn recv_type(rx: &mut WsStream, kind: &str) -> serde_json::Value {
    loop {
        let frame = recv_json(rx).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Receive frames for `window`, returning all of them.
pub async fn collect_for(rx: &mut WsStream, window: Duration) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, rx.next()).await {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(&text).expect("invalid JSON"));
        }
    }
    frames
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Whether `pid` names a process that exists and is not a zombie.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .and_then(|(_, rest)| rest.chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => false,
    }
}
