//! E2E regression test suite for the kennel relay
//!
//! Binds the real axum app on an ephemeral port and drives it the way the
//! deployed system does: robots over a WebSocket (tokio-tungstenite), the
//! dashboard over HTTP (reqwest).
//!
//! Run: `cargo test -p kennel-server --test e2e`

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::{self, Message};

use kennel_server::{web, RelayConfig, RelayGateway};

type RobotSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Shared helpers ───────────────────────────────────────────────────

/// Start a relay on an ephemeral port, return the bound address.
async fn start_test_server(config: RelayConfig) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gateway = RelayGateway::new(config);

    tokio::spawn(async move {
        axum::serve(listener, web::router(gateway)).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Connect a robot and consume the relay's initial status request.
async fn connect_robot(addr: SocketAddr, id: &str) -> RobotSocket {
    let url = format!("ws://{}/ws/{}", addr, id);
    let (mut ws, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    let first = next_json(&mut ws, Duration::from_secs(2))
        .await
        .expect("no status request");
    assert_eq!(first["type"], "status_request");
    ws
}

async fn send_json(ws: &mut RobotSocket, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn send_hello(ws: &mut RobotSocket, capabilities: Value) {
    send_json(
        ws,
        json!({"type": "hello", "capabilities": capabilities, "ip_address": "192.168.1.20"}),
    )
    .await;
}

/// Next JSON text message, or None on timeout/close.
async fn next_json(ws: &mut RobotSocket, timeout: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
        }
    }
}

/// Collect every command message until the socket is quiet for `quiet`.
async fn collect_commands(ws: &mut RobotSocket, quiet: Duration) -> Vec<Value> {
    let mut commands = Vec::new();
    while let Some(msg) = next_json(ws, quiet).await {
        if msg["type"] == "command" {
            commands.push(msg);
        }
    }
    commands
}

/// A centered person 50x100 px (area 5000) in a 640x480 image.
fn person_detections(confidence: f64) -> Value {
    json!({
        "detections": [{
            "class_label": "person",
            "confidence": confidence,
            "bbox": {"x1": 295, "y1": 140, "x2": 345, "y2": 240}
        }],
        "inference_time": 0.045,
        "image_size": {"width": 640, "height": 480}
    })
}

async fn get_json(client: &reqwest::Client, url: String) -> (u16, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

async fn post_command(client: &reqwest::Client, addr: SocketAddr, id: &str, body: Value) -> (u16, Value) {
    let resp = client
        .post(format!("http://{}/client/{}/command", addr, id))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

/// Poll a client's status until `check` passes or two seconds elapse.
async fn wait_for_status(
    client: &reqwest::Client,
    addr: SocketAddr,
    id: &str,
    check: impl Fn(&Value) -> bool,
) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let (code, status) = get_json(client, format!("http://{}/client/{}/status", addr, id)).await;
        if code == 200 && check(&status) {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("status never matched, last: {code} {status}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════════════

/// rpi-1 sees a person at 180 cm, then the person steps in to 20 cm.
#[tokio::test(flavor = "multi_thread")]
async fn pursuit_follows_then_confronts() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "rpi-1").await;

    send_hello(&mut robot, json!({"has_camera": true, "has_distance_sensor": true})).await;
    send_json(
        &mut robot,
        json!({"type": "telemetry", "detections": person_detections(0.9), "distance_cm": 180.0}),
    )
    .await;

    let commands = collect_commands(&mut robot, Duration::from_millis(300)).await;
    assert_eq!(commands.len(), 1, "got {commands:?}");
    assert_eq!(commands[0]["command_type"], "movement");
    assert_eq!(commands[0]["payload"]["action"], "forward");

    let status = wait_for_status(&http, addr, "rpi-1", |s| s["mode"] == "following").await;
    assert_eq!(status["capabilities"]["has_camera"], true);
    assert_eq!(status["ip_address"], "192.168.1.20");

    send_json(&mut robot, json!({"type": "telemetry", "distance_cm": 20.0})).await;
    let commands = collect_commands(&mut robot, Duration::from_millis(300)).await;
    let kinds: Vec<&str> = commands
        .iter()
        .map(|c| c["command_type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"sound"), "got {kinds:?}");
    assert!(kinds.contains(&"light"), "got {kinds:?}");
    assert!(!kinds.contains(&"movement"), "got {kinds:?}");

    wait_for_status(&http, addr, "rpi-1", |s| s["mode"] == "confronting").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_without_id_is_rejected() {
    let addr = start_test_server(RelayConfig::default()).await;

    let resp = reqwest::get(format!("http://{}/ws", addr)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .err()
        .expect("bare /ws must not upgrade");
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status().as_u16() == 400), "{err:?}");

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws/bad%20id", addr))
        .await
        .err()
        .expect("invalid id must not upgrade");
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status().as_u16() == 400), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_live_id_is_refused() {
    let addr = start_test_server(RelayConfig::default()).await;
    let _first = connect_robot(addr, "rpi-1").await;

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws/rpi-1", addr))
        .await
        .err()
        .expect("duplicate id must not upgrade");
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status().as_u16() == 409), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn dashboard_commands_and_errors() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "rpi-2").await;
    send_hello(&mut robot, json!({"has_camera": true, "has_distance_sensor": true})).await;
    wait_for_status(&http, addr, "rpi-2", |s| s["capabilities"]["has_camera"] == true).await;

    let (code, _) = get_json(&http, format!("http://{}/clients", addr)).await;
    assert_eq!(code, 200);

    let (code, reply) = post_command(
        &http,
        addr,
        "rpi-2",
        json!({"client_id": "rpi-2", "command_type": "posture", "data": {"action": "stand"}}),
    )
    .await;
    assert_eq!(code, 200);
    assert_eq!(reply["status"], "success");
    let cmd = next_json(&mut robot, Duration::from_secs(1)).await.unwrap();
    assert_eq!(cmd["command_type"], "posture");
    assert_eq!(cmd["payload"]["action"], "stand");

    // no RGB strip reported
    let (code, reply) = post_command(
        &http,
        addr,
        "rpi-2",
        json!({"command_type": "light", "data": {"mode": "breath", "color": "blue", "delay": 0.1}}),
    )
    .await;
    assert_eq!(code, 422);
    assert_eq!(reply["status"], "error");

    let (code, reply) = post_command(
        &http,
        addr,
        "rpi-2",
        json!({"command_type": "movement", "data": {"action": "moonwalk"}}),
    )
    .await;
    assert_eq!(code, 400);
    assert_eq!(reply["status"], "error");

    let (code, _) = post_command(
        &http,
        addr,
        "nobody",
        json!({"command_type": "posture", "data": {"action": "sit"}}),
    )
    .await;
    assert_eq!(code, 404);

    assert!(collect_commands(&mut robot, Duration::from_millis(200)).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_override_stops_autonomous_commands() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "rpi-3").await;
    send_hello(&mut robot, json!({"has_camera": true, "has_distance_sensor": true})).await;

    let (code, _) = post_command(
        &http,
        addr,
        "rpi-3",
        json!({"command_type": "mode_switch", "data": {"mode": "manual"}}),
    )
    .await;
    assert_eq!(code, 200);

    for distance in [180.0, 20.0, 10.0] {
        send_json(
            &mut robot,
            json!({"type": "telemetry", "detections": person_detections(0.9), "distance_cm": distance}),
        )
        .await;
    }
    // mode_switch itself is not forwarded either
    assert!(collect_commands(&mut robot, Duration::from_millis(300)).await.is_empty());
    wait_for_status(&http, addr, "rpi-3", |s| s["manual_override"] == true && s["distance_cm"] == 10.0).await;

    post_command(
        &http,
        addr,
        "rpi-3",
        json!({"command_type": "mode_switch", "data": {"mode": "auto"}}),
    )
    .await;
    send_json(
        &mut robot,
        json!({"type": "telemetry", "detections": person_detections(0.9), "distance_cm": 180.0}),
    )
    .await;
    assert!(!collect_commands(&mut robot, Duration::from_millis(300)).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn latest_frame_and_detection() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "cam-1").await;

    let resp = http
        .get(format!("http://{}/client/cam-1/latest_frame", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];
    robot.send(Message::binary(jpeg.clone())).await.unwrap();
    send_json(
        &mut robot,
        json!({"type": "telemetry", "detections": person_detections(0.77)}),
    )
    .await;
    wait_for_status(&http, addr, "cam-1", |s| s["last_update_age_secs"].is_number()).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let resp = loop {
        let resp = http
            .get(format!("http://{}/client/cam-1/latest_frame", addr))
            .send()
            .await
            .unwrap();
        if resp.status().as_u16() == 200 || tokio::time::Instant::now() >= deadline {
            break resp;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), jpeg);

    let (code, detection) = get_json(&http, format!("http://{}/client/cam-1/latest_detection", addr)).await;
    assert_eq!(code, 200);
    assert_eq!(detection["inference_time"], 0.045);
    assert_eq!(detection["image_size"]["width"], 640);
    assert_eq!(detection["detections"][0]["bbox"]["width"], 50.0);
    assert!(detection["timestamp"].as_f64().unwrap() > 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_message_keeps_connection() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "rpi-4").await;

    robot.send(Message::text("{not json")).await.unwrap();
    send_json(&mut robot, json!({"type": "telemetry", "distance_cm": -5.0})).await;
    send_json(&mut robot, json!({"type": "teleport"})).await;
    send_json(&mut robot, json!({"type": "telemetry", "distance_cm": 321.0})).await;

    wait_for_status(&http, addr, "rpi-4", |s| s["distance_cm"] == 321.0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_removes_client() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "rpi-5").await;

    let (_, clients) = get_json(&http, format!("http://{}/clients", addr)).await;
    assert_eq!(clients["clients"], json!(["rpi-5"]));

    robot.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let (code, _) = get_json(&http, format!("http://{}/client/rpi-5/status", addr)).await;
        if code == 404 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "client never removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (code, _) = post_command(
        &http,
        addr,
        "rpi-5",
        json!({"command_type": "posture", "data": {"action": "sit"}}),
    )
    .await;
    assert_eq!(code, 404);

    // the id is free again
    let _again = connect_robot(addr, "rpi-5").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn relay_status_counts_traffic() {
    let addr = start_test_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "rpi-6").await;
    send_json(&mut robot, json!({"type": "telemetry", "distance_cm": 250.0})).await;
    wait_for_status(&http, addr, "rpi-6", |s| s["distance_cm"] == 250.0).await;

    let (code, stats) = get_json(&http, format!("http://{}/api/status", addr)).await;
    assert_eq!(code, 200);
    assert_eq!(stats["sessions"], 1);
    assert_eq!(stats["active_clients"], 1);
    assert!(stats["telemetry_received"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn oversize_frame_is_dropped_but_distance_kept() {
    let mut config = RelayConfig::default();
    config.rate_limit.max_frame_bytes = 16;
    let addr = start_test_server(config).await;
    let http = reqwest::Client::new();
    let mut robot = connect_robot(addr, "cam-2").await;

    let frame = kennel_core::TelemetryMessage::encode_frame(&[0xAB; 64]);
    send_json(
        &mut robot,
        json!({"type": "telemetry", "frame": frame, "distance_cm": 123.0}),
    )
    .await;
    wait_for_status(&http, addr, "cam-2", |s| s["distance_cm"] == 123.0).await;
    let resp = http
        .get(format!("http://{}/client/cam-2/latest_frame", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    // exactly at the limit is kept
    let frame = kennel_core::TelemetryMessage::encode_frame(&[0xCD; 16]);
    send_json(&mut robot, json!({"type": "telemetry", "frame": frame, "distance_cm": 124.0})).await;
    wait_for_status(&http, addr, "cam-2", |s| s["distance_cm"] == 124.0).await;
    let resp = http
        .get(format!("http://{}/client/cam-2/latest_frame", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.bytes().await.unwrap().to_vec(), vec![0xCD; 16]);
}

/// A client that sends the upgrade request and hangs up must not keep the id.
#[tokio::test(flavor = "multi_thread")]
async fn abandoned_handshake_releases_client_id() {
    use tokio::io::AsyncWriteExt;

    let addr = start_test_server(RelayConfig::default()).await;
    {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /ws/rpi-9 HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    // well inside the liveness window, so only the cleanup can free it
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio_tungstenite::connect_async(format!("ws://{}/ws/rpi-9", addr)).await {
            Ok(_) => break,
            Err(tungstenite::Error::Http(r)) if r.status().as_u16() == 409 => {}
            Err(e) => panic!("unexpected connect error: {e:?}"),
        }
        assert!(tokio::time::Instant::now() < deadline, "rpi-9 still held by an abandoned handshake");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
