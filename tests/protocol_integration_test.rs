//! 协议集成测试：完整的换行分帧 JSON 经由连接处理循环到达引擎、工具、资源与操作桥

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stagehand::config::AppConfig;
use stagehand::core::{App, AppBuilder};
use stagehand::host::memory::SCENE_URI;
use stagehand::host::ExecutionContext;
use stagehand::protocol::{serve_connection, ToolResult};
use stagehand::resources::Resource;
use stagehand::tools::Tool;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
}

impl Client {
    async fn send(&mut self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    async fn send_raw(&mut self, frame: &str) {
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(FRAME_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, id: u64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        let reply = self.recv().await;
        assert_eq!(reply["id"], id);
        reply
    }

    async fn handshake(&mut self) {
        let reply = self
            .request(
                0,
                "initialize",
                json!({"protocolVersion": "2024-11-05", "clientInfo": {"name": "it", "version": "1"}}),
            )
            .await;
        assert_eq!(reply["result"]["serverInfo"]["name"], "stagehand");
        self.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
    }
}

struct Harness {
    app: App,
    token: CancellationToken,
    host_loop: Option<std::thread::JoinHandle<()>>,
    connection: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(app: App) -> (Self, Client) {
        let token = CancellationToken::new();
        let host_loop = app.spawn_host_loop(token.clone()).unwrap();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let connection = tokio::spawn(serve_connection(
            Arc::clone(&app.server),
            server_read,
            server_write,
            token.clone(),
        ));

        let (client_read, client_write) = tokio::io::split(client_io);
        let client = Client {
            writer: client_write,
            lines: BufReader::new(client_read).lines(),
        };
        (
            Self {
                app,
                token,
                host_loop: Some(host_loop),
                connection,
            },
            client,
        )
    }

    fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.host_loop.take() {
            handle.join().unwrap();
        }
        self.app.bridge.shutdown();
    }
}

fn app() -> App {
    let mut config = AppConfig::default();
    config.bridge.tick_interval_ms = 2;
    AppBuilder::new(config).build()
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps before answering"
    }

    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, String> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(ToolResult::text("slow done"))
    }
}

#[tokio::test]
async fn test_handshake_lists_host_capabilities() {
    let (harness, mut client) = Harness::start(app());

    // 未初始化前的请求被拒绝
    let reply = client.request(1, "tools/list", json!({})).await;
    assert_eq!(reply["error"]["code"], -32002);

    client.handshake().await;

    let reply = client.request(2, "tools/list", json!({})).await;
    let names: Vec<&str> = reply["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in ["create_object", "echo", "list_objects", "plan_goal", "save_scene"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }

    let reply = client.request(3, "resources/list", json!({})).await;
    let resources = reply["result"]["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 2);
    assert!(resources.iter().any(|r| r["uri"] == SCENE_URI));

    let reply = client.request(4, "prompts/list", json!({})).await;
    assert_eq!(reply["result"]["prompts"], json!([]));

    harness.stop();
}

#[tokio::test]
async fn test_host_tool_runs_on_main_turn_and_updates_snapshot() {
    let (harness, mut client) = Harness::start(app());
    client.handshake().await;

    let reply = client
        .request(
            1,
            "tools/call",
            json!({"name": "create_object", "arguments": {"name": "Crate", "kind": "cube"}}),
        )
        .await;
    assert_eq!(reply["result"]["isError"], false);
    assert!(reply["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Crate"));

    // 重名是业务错误，不是协议错误
    let reply = client
        .request(
            2,
            "tools/call",
            json!({"name": "create_object", "arguments": {"name": "Crate"}}),
        )
        .await;
    assert_eq!(reply["result"]["isError"], true);

    let reply = client
        .request(3, "resources/read", json!({"uri": SCENE_URI}))
        .await;
    let block = &reply["result"]["contents"][0];
    assert_eq!(block["mimeType"], "application/json");
    let scene: Value = serde_json::from_str(block["text"].as_str().unwrap()).unwrap();
    assert_eq!(scene["objects"][0]["name"], "Crate");

    harness.stop();
}

#[tokio::test]
async fn test_missing_required_argument_is_business_error() {
    let (harness, mut client) = Harness::start(app());
    client.handshake().await;

    let reply = client
        .request(1, "tools/call", json!({"name": "select_object", "arguments": {}}))
        .await;
    assert_eq!(reply["result"]["isError"], true);

    let reply = client
        .request(2, "tools/call", json!({"name": "no_such_tool"}))
        .await;
    assert_eq!(reply["error"]["code"], -32602);

    harness.stop();
}

#[tokio::test]
async fn test_concurrent_calls_reply_out_of_order() {
    let app = app();
    app.tools.register(SlowTool);
    let (harness, mut client) = Harness::start(app);
    client.handshake().await;

    client
        .send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "slow"}}))
        .await;
    client
        .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "echo", "arguments": {"text": "fast"}}}))
        .await;

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"]["content"][0]["text"], "fast");
    assert_eq!(second["id"], 1);
    assert_eq!(second["result"]["content"][0]["text"], "slow done");

    harness.stop();
}

#[tokio::test]
async fn test_subscription_receives_update_notification() {
    let (harness, mut client) = Harness::start(app());
    client.handshake().await;

    let reply = client
        .request(1, "resources/subscribe", json!({"uri": SCENE_URI}))
        .await;
    assert_eq!(reply["result"], json!({}));

    client
        .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "create_object", "arguments": {"name": "Lamp", "kind": "light"}}}))
        .await;

    // 通知与响应的先后不确定
    let frames = [client.recv().await, client.recv().await];
    let notification = frames
        .iter()
        .find(|f| f.get("id").is_none())
        .expect("no notification received");
    assert_eq!(notification["method"], "notifications/resources/updated");
    assert_eq!(notification["params"]["uri"], SCENE_URI);
    assert!(frames.iter().any(|f| f["id"] == 2));

    let reply = client
        .request(3, "resources/unsubscribe", json!({"uri": SCENE_URI}))
        .await;
    assert_eq!(reply["result"], json!({}));

    harness.stop();
}

#[tokio::test]
async fn test_closing_connection_drops_subscriptions() {
    let (harness, mut client) = Harness::start(app());
    client.handshake().await;
    client
        .request(1, "resources/subscribe", json!({"uri": SCENE_URI}))
        .await;

    let resource = harness.app.resources.get(SCENE_URI).unwrap();
    assert_eq!(resource.subscribers().len(), 1);

    drop(client);
    let Harness { app, token, host_loop, connection } = harness;
    tokio::time::timeout(FRAME_TIMEOUT, connection)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(resource.subscribers().is_empty());

    token.cancel();
    if let Some(handle) = host_loop {
        handle.join().unwrap();
    }
    app.bridge.shutdown();
}

#[tokio::test]
async fn test_parse_error_and_plan_goal_over_the_wire() {
    let (harness, mut client) = Harness::start(app());

    client.send_raw("{this is not json").await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    client.handshake().await;
    let reply = client
        .request(
            1,
            "tools/call",
            json!({"name": "plan_goal", "arguments": {"goal": "create a new scene"}}),
        )
        .await;
    assert_eq!(reply["result"]["isError"], false);
    let plan: Value =
        serde_json::from_str(reply["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(plan["source"], "template");
    assert_eq!(plan["steps"][0]["toolName"], "create_scene");

    harness.stop();
}
