//! HTTP JSON API over the ledger.
//!
//! A small HTTP/1.1 server on a raw `TcpListener`: one task per connection,
//! one request per connection (`Connection: close`). Request heads are parsed
//! with `httparse`; routing happens in [`handle_request`], a plain function
//! from [`Request`] to [`Response`] so the routes can be exercised without a
//! socket.
//!
//! | route                 | purpose |
//! |-----------------------|---------|
//! | `GET /health`         | liveness |
//! | `GET /api/stats`      | statistics with ETag / `If-None-Match` |
//! | `POST /api/roll`      | append an outcome |
//! | `POST /api/rollback`  | undo the latest outcome |
//! | `POST /api/reset`     | clear the window |
//! | `GET/POST /api/config`| read / merge chat config |
//! | `GET /api/history`    | history tail and window |

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::etag;
use crate::ledger::Ledger;
use crate::record::ChatId;

/// Largest accepted request head.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request from a method and a request target (`/path?query`).
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = body.to_string().into_bytes();
        self.with_header("Content-Type", "application/json")
    }

    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as a JSON object; an empty body is an empty object.
    fn json_object(&self) -> Result<Map<String, Value>, Response> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(Response::error(400, "body must be a JSON object")),
            Err(e) => Err(Response::error(400, &format!("invalid JSON body: {e}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string().into_bytes(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &json!({ "error": message }))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON (`Value::Null` when empty or not JSON).
    pub fn json_body(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    /// Serialize status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if self.status != 304 && self.status != 204 {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// Percent-decoding for URL query parameters (`+` is a space).
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, val) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key), url_decode(val))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Dispatch one request against the ledger.
pub fn handle_request(ledger: &Ledger, req: &Request) -> Response {
    let outcome = match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/health") => Ok(Response::json(200, &json!({"status": "ok"}))),
        ("GET", "/api/stats") => stats(ledger, req),
        ("POST", "/api/roll") => roll(ledger, req),
        ("POST", "/api/rollback") => rollback(ledger, req),
        ("POST", "/api/reset") => reset(ledger, req),
        ("GET", "/api/config") => get_config(ledger, req),
        ("POST", "/api/config") => set_config(ledger, req),
        ("GET", "/api/history") => history(ledger, req),
        (_, "/health" | "/api/stats" | "/api/roll" | "/api/rollback" | "/api/reset"
            | "/api/config" | "/api/history") => Err(Response::error(405, "method not allowed")),
        _ => Err(Response::error(404, "not found")),
    };
    let response = outcome.unwrap_or_else(|r| r);
    debug!(method = %req.method, path = %req.path, status = response.status, "request handled");
    response
}

type RouteResult = Result<Response, Response>;

fn ledger_error(e: LedgerError) -> Response {
    if e.is_client_error() {
        warn!(error = %e, "rejected request");
        Response::error(400, &e.to_string())
    } else {
        error!(error = %e, "ledger operation failed");
        Response::error(500, &e.to_string())
    }
}

fn query_chat(req: &Request) -> Result<ChatId, Response> {
    req.query
        .get("chat_id")
        .filter(|s| !s.is_empty())
        .map(|s| ChatId::from(s.as_str()))
        .ok_or_else(|| Response::error(400, "chat_id required"))
}

fn body_chat(body: &Map<String, Value>) -> Result<ChatId, Response> {
    match body.get("chat_id") {
        Some(Value::String(s)) if !s.is_empty() => Ok(ChatId::from(s.as_str())),
        Some(Value::Number(n)) => Ok(match n.as_i64() {
            Some(i) => ChatId::from(i),
            None => ChatId::from(n.to_string()),
        }),
        _ => Err(Response::error(400, "chat_id required")),
    }
}

fn body_outcome(body: &Map<String, Value>) -> Result<i64, Response> {
    match body.get("n") {
        // Integral floats such as `17.0` are accepted; the cast saturates and
        // out-of-range values are rejected by the ledger.
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| Response::error(400, "n must be an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| Response::error(400, "n must be an integer")),
        _ => Err(Response::error(400, "chat_id and n required")),
    }
}

fn stats_payload(ledger: &Ledger, chat: ChatId) -> Result<Value, Response> {
    let snapshot = ledger.compute_stats(chat).map_err(ledger_error)?;
    serde_json::to_value(&snapshot).map_err(|e| Response::error(500, &e.to_string()))
}

fn stats(ledger: &Ledger, req: &Request) -> RouteResult {
    let chat = query_chat(req)?;
    let snapshot = ledger.compute_stats(chat).map_err(ledger_error)?;
    let tag = etag::fingerprint(&snapshot);

    if etag::matches(req.header("If-None-Match"), &tag) {
        return Ok(Response::empty(304)
            .with_header("ETag", &tag)
            .with_header("Cache-Control", etag::CACHE_CONTROL));
    }

    let body = json!({
        "stats": snapshot,
        "window": snapshot.meta.window_capacity,
    });
    Ok(Response::json(200, &body)
        .with_header("ETag", &tag)
        .with_header("Cache-Control", etag::CACHE_CONTROL))
}

fn roll(ledger: &Ledger, req: &Request) -> RouteResult {
    let body = req.json_object()?;
    let chat = body_chat(&body)?;
    let n = body_outcome(&body)?;
    ledger.append_outcome(&chat, n).map_err(ledger_error)?;
    let stats = stats_payload(ledger, chat)?;
    Ok(Response::json(200, &json!({"ok": true, "stats": stats})))
}

fn rollback(ledger: &Ledger, req: &Request) -> RouteResult {
    let body = req.json_object()?;
    let chat = body_chat(&body)?;
    ledger.rollback_last(&chat).map_err(ledger_error)?;
    let stats = stats_payload(ledger, chat)?;
    Ok(Response::json(200, &json!({"ok": true, "stats": stats})))
}

fn reset(ledger: &Ledger, req: &Request) -> RouteResult {
    let body = req.json_object()?;
    let chat = body_chat(&body)?;
    ledger.reset_window(&chat).map_err(ledger_error)?;
    let stats = stats_payload(ledger, chat)?;
    Ok(Response::json(200, &json!({"ok": true, "stats": stats})))
}

fn get_config(ledger: &Ledger, req: &Request) -> RouteResult {
    let chat = query_chat(req)?;
    let config = ledger.get_config(chat).map_err(ledger_error)?;
    Ok(Response::json(200, &json!(config)))
}

fn set_config(ledger: &Ledger, req: &Request) -> RouteResult {
    let mut body = req.json_object()?;
    let chat = body_chat(&body)?;
    body.remove("chat_id");
    let config = ledger.set_config(&chat, &body).map_err(ledger_error)?;
    let stats = stats_payload(ledger, chat)?;
    Ok(Response::json(
        200,
        &json!({"ok": true, "config": config, "stats": stats}),
    ))
}

fn history(ledger: &Ledger, req: &Request) -> RouteResult {
    let chat = query_chat(req)?;
    let record = ledger.record(chat).map_err(ledger_error)?;
    let shown = record.config.history_display_cap.max(1);
    let start = record.history.len().saturating_sub(shown);
    Ok(Response::json(
        200,
        &json!({
            "history": &record.history[start..],
            "window": record.window,
            "total": record.history.len(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Bind `addr` and serve until the listener fails.
pub async fn serve(ledger: Arc<Ledger>, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, store = %ledger.store().describe(), "API listening");
    serve_listener(listener, ledger).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(listener: TcpListener, ledger: Arc<Ledger>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ledger).await {
                warn!(%peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, ledger: Arc<Ledger>) -> Result<(), BoxError> {
    let response = match read_request(&mut stream).await {
        Ok(Some(req)) => {
            // Ledger calls do blocking file I/O.
            tokio::task::spawn_blocking(move || handle_request(&ledger, &req)).await?
        }
        Ok(None) => return Ok(()),
        Err(resp) => resp,
    };
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read one request. `Ok(None)` when the peer closed before sending one.
async fn read_request(stream: &mut TcpStream) -> Result<Option<Request>, Response> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let (mut req, head_len, content_length) = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Response::error(400, &e.to_string()))?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Response::error(400, "incomplete request"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(parsed) = parse_head(&buf)? {
            break parsed;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Response::error(413, "request head too large"));
        }
    };

    if content_length > MAX_BODY_BYTES {
        return Err(Response::error(413, "request body too large"));
    }
    let mut body = buf.split_off(head_len.min(buf.len()));
    while body.len() < content_length {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Response::error(400, &e.to_string()))?;
        if n == 0 {
            return Err(Response::error(400, "truncated body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    req.body = body;
    Ok(Some(req))
}

/// Parse a request head. `Ok(None)` while more bytes are needed.
///
/// Returns the request (without body), the head length and the declared
/// `Content-Length`.
pub fn parse_head(buf: &[u8]) -> Result<Option<(Request, usize, usize)>, Response> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let head_len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Response::error(400, &format!("malformed request: {e}"))),
    };

    let method = parsed.method.unwrap_or("GET");
    let target = parsed.path.unwrap_or("/");
    let mut req = Request::new(method, target);
    for h in parsed.headers.iter() {
        req.headers.push((
            h.name.to_string(),
            String::from_utf8_lossy(h.value).trim().to_string(),
        ));
    }

    let content_length = match req.header("Content-Length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| Response::error(400, "invalid Content-Length"))?,
        None => 0,
    };
    Ok(Some((req, head_len, content_length)))
}
