//! Loopback HTTP/1.1 control surface over a `PipelineContext`.
//!
//! Routes:
//! - `GET /health`
//! - `GET /api/alerts`, `POST /api/alerts`
//! - `GET /api/alerts/{id}`, `PUT /api/alerts/{id}` (`id` is the display index or uid)
//! - `GET /api/status`, `GET /api/stats`
//! - `POST /api/start_video`, `POST /api/stop_video`
//! - `GET /api/events` (server-sent events, one thread per viewer)
//! - `GET /video/latest.jpg` (feature `jpeg`)

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alert::{AlertError, AlertRef, AlertUpdate, NewAlert};
use crate::pipeline::PipelineContext;

const MAX_REQUEST_BYTES: usize = 8192;
const EVENT_POLL: Duration = Duration::from_secs(1);
#[cfg(feature = "jpeg")]
const JPEG_QUALITY: u8 = 80;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: Arc<PipelineContext>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: Arc<PipelineContext>) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    ctx: Arc<PipelineContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &ctx, &shutdown) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    ctx: &Arc<PipelineContext>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    if request.method == "GET" && request.path == "/api/events" {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            if let Err(err) = stream_events(stream, &ctx, &shutdown) {
                log::debug!("event stream from {} closed: {}", peer, err);
            }
        });
        return Ok(());
    }

    let response = route(ctx, &request);
    write_response(
        &mut stream,
        response.status,
        response.content_type,
        &response.body,
    )
}

// ----------------------------------------------------------------------------
// Routing
// ----------------------------------------------------------------------------

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::error(500, &err.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({ "error": message }).to_string().into_bytes(),
        }
    }
}

fn route(ctx: &PipelineContext, request: &HttpRequest) -> Response {
    let method = request.method.as_str();
    let path = request.path.trim_end_matches('/');
    match (method, path) {
        ("GET", "/health") => Response::json(200, &json!({ "status": "ok" })),
        ("GET", "/api/alerts") => Response::json(200, &ctx.list_alerts()),
        ("POST", "/api/alerts") => create_alert(ctx, &request.body),
        ("GET", "/api/status") => Response::json(200, &ctx.status()),
        ("GET", "/api/stats") => Response::json(200, &ctx.stats()),
        ("POST", "/api/start_video") => {
            let status = if ctx.start_capture() {
                "started"
            } else {
                "already_running"
            };
            Response::json(200, &json!({ "status": status }))
        }
        ("POST", "/api/stop_video") => {
            let status = if ctx.stop_capture() {
                "stopped"
            } else {
                "already_stopped"
            };
            Response::json(200, &json!({ "status": status }))
        }
        #[cfg(feature = "jpeg")]
        ("GET", "/video/latest.jpg") => latest_jpeg(ctx),
        (_, path) => match path.strip_prefix("/api/alerts/") {
            Some(id) => alert_by_id(ctx, method, id, &request.body),
            None if is_known_path(path) => Response::error(405, "method_not_allowed"),
            None => Response::error(404, "not_found"),
        },
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/health"
            | "/api/alerts"
            | "/api/status"
            | "/api/stats"
            | "/api/start_video"
            | "/api/stop_video"
            | "/api/events"
            | "/video/latest.jpg"
    )
}

fn create_alert(ctx: &PipelineContext, body: &[u8]) -> Response {
    let new: NewAlert = if body.is_empty() {
        NewAlert::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(new) => new,
            Err(err) => return Response::error(400, &format!("invalid JSON: {}", err)),
        }
    };
    match ctx.create_manual_alert(new) {
        Ok(record) => Response::json(201, &record),
        Err(err) => alert_error(err),
    }
}

fn alert_by_id(ctx: &PipelineContext, method: &str, id: &str, body: &[u8]) -> Response {
    let alert: AlertRef = match id.parse() {
        Ok(alert) => alert,
        Err(_) => return Response::error(404, "Alert not found"),
    };
    match method {
        "GET" => match ctx.alerts().get(&alert) {
            Some(record) => Response::json(200, &record),
            None => Response::error(404, "Alert not found"),
        },
        "PUT" => {
            let update: AlertUpdate = match serde_json::from_slice(body) {
                Ok(update) => update,
                Err(err) => return Response::error(400, &format!("invalid JSON: {}", err)),
            };
            match ctx.update_alert(&alert, update) {
                Ok(record) => Response::json(200, &record),
                Err(err) => alert_error(err),
            }
        }
        _ => Response::error(405, "method_not_allowed"),
    }
}

fn alert_error(err: AlertError) -> Response {
    match err {
        AlertError::NotFound(_) => Response::error(404, "Alert not found"),
        AlertError::Invalid(msg) => Response::error(400, &msg),
        AlertError::Unavailable(msg) => {
            log::error!("alert store unavailable: {}", msg);
            Response::error(503, "unavailable")
        }
    }
}

#[cfg(feature = "jpeg")]
fn latest_jpeg(ctx: &PipelineContext) -> Response {
    let Some(output) = ctx.latest_frame() else {
        return Response::error(404, "no_frame");
    };
    match output.frame.encode_jpeg(JPEG_QUALITY) {
        Ok(body) => Response {
            status: 200,
            content_type: "image/jpeg",
            body,
        },
        Err(err) => Response::error(500, &err.to_string()),
    }
}

// ----------------------------------------------------------------------------
// Live events
// ----------------------------------------------------------------------------

fn stream_events(
    mut stream: TcpStream,
    ctx: &PipelineContext,
    shutdown: &AtomicBool,
) -> Result<()> {
    let subscription = ctx.subscribe();
    stream.write_all(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-store\r\nConnection: keep-alive\r\n\r\n",
    )?;
    while !shutdown.load(Ordering::SeqCst) {
        match subscription.next_timeout(EVENT_POLL)? {
            Some(event) => {
                let payload = event.payload_json()?;
                stream.write_all(format!("event: {}\ndata: ", event.name()).as_bytes())?;
                stream.write_all(&payload)?;
                stream.write_all(b"\n\n")?;
            }
            None => stream.write_all(b": keepalive\n\n")?,
        }
        stream.flush()?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// HTTP plumbing
// ----------------------------------------------------------------------------

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    while data.len() < header_end + content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = data[header_end..header_end + content_length].to_vec();

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedDetector;
    use crate::ingest::{SourceConfig, SyntheticSource};
    use crate::pipeline::{PipelineBuilder, PipelineSettings};

    fn context() -> Arc<PipelineContext> {
        PipelineBuilder::new(PipelineSettings::default())
            .source(Box::new(SyntheticSource::new(SourceConfig {
                width: 16,
                height: 16,
                ..SourceConfig::default()
            })))
            .detector(Box::new(ScriptedDetector::new()))
            .build()
            .unwrap()
    }

    fn request(method: &str, path: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn body_json(response: &Response) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn manual_alert_then_update() {
        let ctx = context();
        let created = route(
            &ctx,
            &request("POST", "/api/alerts", r#"{"location":"Dock 4","isRural":true}"#),
        );
        assert_eq!(created.status, 201);
        assert_eq!(body_json(&created)["id"], 1);

        let updated = route(
            &ctx,
            &request("PUT", "/api/alerts/1", r#"{"status":"resolved"}"#),
        );
        assert_eq!(updated.status, 200);
        let value = body_json(&updated);
        assert_eq!(value["status"], "resolved");
        assert_eq!(value["location"], "Dock 4");

        let unchanged = route(&ctx, &request("PUT", "/api/alerts/1", "{}"));
        assert_eq!(unchanged.status, 200);
        assert_eq!(body_json(&unchanged)["status"], "resolved");
    }

    #[test]
    fn error_statuses() {
        let ctx = context();
        let missing = route(
            &ctx,
            &request("PUT", "/api/alerts/7", r#"{"status":"resolved"}"#),
        );
        assert_eq!(missing.status, 404);
        assert_eq!(body_json(&missing)["error"], "Alert not found");

        assert_eq!(route(&ctx, &request("POST", "/api/alerts", "{nope")).status, 400);
        assert_eq!(
            route(&ctx, &request("POST", "/api/alerts", r#"{"location":"<x>"}"#)).status,
            400
        );
        assert_eq!(route(&ctx, &request("DELETE", "/api/alerts", "")).status, 405);
        assert_eq!(route(&ctx, &request("GET", "/nowhere", "")).status, 404);
    }

    #[test]
    fn capture_control_routes() {
        let ctx = context();
        let start = route(&ctx, &request("POST", "/api/start_video", ""));
        assert_eq!(body_json(&start)["status"], "started");
        let again = route(&ctx, &request("POST", "/api/start_video", ""));
        assert_eq!(body_json(&again)["status"], "already_running");

        let status = route(&ctx, &request("GET", "/api/status", ""));
        assert_eq!(body_json(&status)["capturing"], true);
        assert_eq!(body_json(&status)["status_text"], "No Garbage");

        route(&ctx, &request("POST", "/api/stop_video", ""));
        let stop = route(&ctx, &request("POST", "/api/stop_video", ""));
        assert_eq!(body_json(&stop)["status"], "already_stopped");
    }
}
