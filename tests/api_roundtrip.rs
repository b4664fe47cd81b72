use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use cleansight::api::{ApiConfig, ApiHandle, ApiServer};
use cleansight::{
    PipelineBuilder, PipelineContext, PipelineSettings, ScriptedDetector, SourceConfig,
    SyntheticSource,
};

fn start() -> (Arc<PipelineContext>, ApiHandle) {
    let ctx = PipelineBuilder::new(PipelineSettings::default())
        .source(Box::new(SyntheticSource::new(SourceConfig {
            uri: "stub://api".to_string(),
            width: 16,
            height: 16,
            target_fps: 10,
        })))
        .detector(Box::new(ScriptedDetector::new()))
        .build()
        .expect("pipeline");
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        ctx.clone(),
    )
    .spawn()
    .expect("spawn api");
    (ctx, handle)
}

fn send(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
        method = method,
        path = path,
        len = body.len(),
        body = body
    );
    stream.write_all(request.as_bytes()).expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read");

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).expect("json body")
}

#[test]
fn health_and_status() {
    let (_ctx, handle) = start();
    let (status, body) = send(handle.addr, "GET", "/health", None);
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "ok");

    let (status, body) = send(handle.addr, "GET", "/api/status", None);
    assert_eq!(status, 200);
    let value = json(&body);
    assert_eq!(value["capturing"], false);
    assert_eq!(value["garbage_detected"], false);
    assert_eq!(value["alerts"], 0);

    handle.stop().expect("stop");
}

#[test]
fn alert_lifecycle_over_http() {
    let (ctx, handle) = start();

    let (status, body) = send(
        handle.addr,
        "POST",
        "/api/alerts",
        Some(r#"{"message":"Bags dumped by the gate","location":"North gate","isRural":true}"#),
    );
    assert_eq!(status, 201);
    let created = json(&body);
    assert_eq!(created["id"], 1);
    assert_eq!(created["status"], "pending");
    let uid = created["uid"].as_str().expect("uid").to_string();

    let (status, body) = send(
        handle.addr,
        "PUT",
        &format!("/api/alerts/{}", uid),
        Some(r#"{"status":"in_progress","assignedTo":"crew 3"}"#),
    );
    assert_eq!(status, 200);
    let updated = json(&body);
    assert_eq!(updated["status"], "in_progress");
    assert_eq!(updated["assignedTo"], "crew 3");
    assert_eq!(updated["message"], "Bags dumped by the gate");

    let (status, body) = send(handle.addr, "GET", "/api/alerts", None);
    assert_eq!(status, 200);
    assert_eq!(json(&body).as_array().map(|a| a.len()), Some(1));

    let (status, body) = send(
        handle.addr,
        "PUT",
        "/api/alerts/99",
        Some(r#"{"status":"resolved"}"#),
    );
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "Alert not found");

    let (status, _) = send(handle.addr, "PUT", "/api/alerts/1", Some("not json"));
    assert_eq!(status, 400);
    assert_eq!(ctx.list_alerts()[0].status.as_str(), "in_progress");

    handle.stop().expect("stop");
}

#[test]
fn video_controls_are_idempotent() {
    let (ctx, handle) = start();
    let (_, body) = send(handle.addr, "POST", "/api/start_video", None);
    assert_eq!(json(&body)["status"], "started");
    assert!(ctx.is_capturing());

    let (_, body) = send(handle.addr, "POST", "/api/stop_video", None);
    assert_eq!(json(&body)["status"], "stopped");
    let (status, body) = send(handle.addr, "POST", "/api/stop_video", None);
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "already_stopped");
    assert!(!ctx.is_capturing());

    handle.stop().expect("stop");
}

#[test]
fn event_stream_starts_with_snapshot() {
    let (ctx, handle) = start();
    ctx.create_manual_alert(Default::default()).expect("alert");

    let mut stream = TcpStream::connect(handle.addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    stream
        .write_all(b"GET /api/events HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("write");

    let mut reader = BufReader::new(stream);
    let event_line = loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("read line");
        assert!(n > 0, "stream closed before the first event");
        if line.starts_with("event: ") {
            break line;
        }
    };
    assert_eq!(event_line.trim_end(), "event: alerts");

    let mut data = String::new();
    reader.read_line(&mut data).expect("read data");
    let payload = json(data.trim_start_matches("data: ").trim_end());
    assert_eq!(payload.as_array().map(|a| a.len()), Some(1));

    drop(reader);
    handle.stop().expect("stop");
}
