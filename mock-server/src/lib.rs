//! Mock batch processor.
//!
//! Accepts a `multipart/mixed` batch POST at `/batch-processor`, serves every
//! `application/http-request` part against an in-memory resource store, and
//! answers `207 Multi-Status` with one `application/http-response` part per
//! subrequest, in request order.
//!
//! The `fault` query parameter makes the processor misbehave on purpose:
//! `truncate` drops the last part, `surplus` appends an unrequested part,
//! `broken` sends the first part with unterminated headers, `error` answers
//! 500 instead of a batch, `quoted-printable` transfer-encodes every part and
//! `legacy` writes a preamble, LF line endings and version-less status lines.
//!
//! Parsing here is deliberately independent from the client crate; the
//! integration tests catch any drift between the two.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub content_type: String,
    pub body: Vec<u8>,
}

pub type Db = Arc<RwLock<HashMap<String, Resource>>>;

/// A subrequest decoded from one request part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SubRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path of the target, without origin or query.
    pub fn path(&self) -> &str {
        let target = match self.target.find("://") {
            Some(i) => {
                let rest = &self.target[i + 3..];
                rest.find('/').map_or("/", |p| &rest[p..])
            }
            None => self.target.as_str(),
        };
        target.split(&['?', '#'][..]).next().unwrap_or(target)
    }
}

/// A subresponse to be written into one response part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubResponse {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SubResponse {
    fn empty(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    Truncate,
    Surplus,
    Broken,
    QuotedPrintable,
    Legacy,
}

/// Store preloaded with a user and a group.
pub fn seed() -> Db {
    let mut resources = HashMap::new();
    resources.insert(
        "/users/1.json".to_string(),
        Resource {
            content_type: "application/json".to_string(),
            body: json!({"id": "user-1", "displayName": "Deidra Hough"}).to_string().into_bytes(),
        },
    );
    resources.insert(
        "/groups/1.json".to_string(),
        Resource {
            content_type: "application/json".to_string(),
            body: json!({"id": "group-1", "displayName": "Risus Urna Ve"}).to_string().into_bytes(),
        },
    );
    Arc::new(RwLock::new(resources))
}

pub fn app() -> Router {
    app_with(seed())
}

pub fn app_with(db: Db) -> Router {
    Router::new().route("/batch-processor", post(batch)).with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn batch(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let fault = match params.get("fault").map(String::as_str) {
        Some("error") => {
            return (StatusCode::INTERNAL_SERVER_ERROR, " o/` an error occurred o/` ").into_response();
        }
        Some("truncate") => Some(Fault::Truncate),
        Some("surplus") => Some(Fault::Surplus),
        Some("broken") => Some(Fault::Broken),
        Some("quoted-printable") => Some(Fault::QuotedPrintable),
        Some("legacy") => Some(Fault::Legacy),
        _ => None,
    };

    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_of)
    else {
        return (StatusCode::BAD_REQUEST, "expected a multipart batch request").into_response();
    };
    let Some(parts) = split_parts(&body, &boundary) else {
        return (StatusCode::BAD_REQUEST, "malformed multipart body").into_response();
    };

    let mut responses = Vec::with_capacity(parts.len());
    for part in parts {
        let response = match parse_subrequest(part) {
            Some(request) => {
                debug!(method = %request.method, target = %request.target, "subrequest");
                serve(&db, request).await
            }
            None => SubResponse::empty(400, "Bad Request"),
        };
        responses.push(response);
    }

    match fault {
        Some(Fault::Truncate) => {
            responses.pop();
        }
        Some(Fault::Surplus) => responses.push(SubResponse::empty(200, "OK")),
        _ => {}
    }

    let boundary = format!("mock_{}", Uuid::new_v4().simple());
    let content_type = format!("multipart/parallel; boundary=\"{boundary}\"");
    let body = render(&responses, &boundary, fault);
    (StatusCode::MULTI_STATUS, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn serve(db: &Db, request: SubRequest) -> SubResponse {
    let path = request.path().to_string();
    match request.method.as_str() {
        "GET" | "HEAD" => match db.read().await.get(&path) {
            Some(resource) => {
                let body = if request.method == "HEAD" { Vec::new() } else { resource.body.clone() };
                SubResponse::empty(200, "OK").with_body(&resource.content_type, body)
            }
            None if path == "/users/@self" => SubResponse::empty(401, "Unauthorized")
                .with_header("WWW-Authenticate", "Basic realm=\"Mock\"")
                .with_header("WWW-Authenticate", "OAuth realm=\"Mock\""),
            None => SubResponse::empty(404, "Not Found"),
        },
        "PUT" => {
            let content_type = request
                .header("Content-Type")
                .unwrap_or("application/octet-stream")
                .to_string();
            let resource = Resource {
                content_type,
                body: request.body,
            };
            match db.write().await.insert(path, resource) {
                Some(_) => SubResponse::empty(204, "No Content"),
                None => SubResponse::empty(201, "Created"),
            }
        }
        "DELETE" => match db.write().await.remove(&path) {
            Some(_) => SubResponse::empty(204, "No Content"),
            None => SubResponse::empty(404, "Not Found"),
        },
        "POST" if path == "/echo" => {
            let content_type = request.header("Content-Type").unwrap_or("text/plain").to_string();
            SubResponse::empty(200, "OK")
                .with_header("X-Echo-Method", "POST")
                .with_body(&content_type, request.body)
        }
        _ => SubResponse::empty(405, "Method Not Allowed").with_header("Allow", "GET, HEAD, PUT, DELETE"),
    }
}

/// `boundary` parameter of a multipart Content-Type value.
fn boundary_of(content_type: &str) -> Option<String> {
    let (media_type, params) = content_type.split_once(';')?;
    if !media_type.trim().to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Part contents between the delimiters of `body`, CRLF framing only.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Option<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut pos = find(body, delimiter, 0)?;
    let mut parts = Vec::new();
    loop {
        let start = pos + delimiter.len();
        if body[start..].starts_with(b"--") {
            return Some(parts);
        }
        let start = start + 2;
        let next = find(body, delimiter, start)?;
        parts.push(body.get(start..next.checked_sub(2)?)?);
        pos = next;
    }
}

/// Decode `Content-Type: application/http-request` part content.
fn parse_subrequest(part: &[u8]) -> Option<SubRequest> {
    let (mime_head, message) = match part.strip_prefix(b"\r\n") {
        Some(message) => (&part[..0], message),
        None => {
            let end = find(part, b"\r\n\r\n", 0)?;
            (&part[..end], &part[end + 4..])
        }
    };
    let mime_headers = String::from_utf8_lossy(mime_head);
    let is_request = mime_headers.lines().any(|line| {
        line.split_once(':').is_some_and(|(n, v)| {
            n.trim().eq_ignore_ascii_case("content-type") && v.trim().eq_ignore_ascii_case("application/http-request")
        })
    });
    if !is_request {
        return None;
    }

    let message_head_end = find(message, b"\r\n\r\n", 0)?;
    let head = String::from_utf8_lossy(&message[..message_head_end]);
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.to_string(), v.trim().to_string()))
        .collect();

    Some(SubRequest {
        method,
        target,
        headers,
        body: message[message_head_end + 4..].to_vec(),
    })
}

fn render(responses: &[SubResponse], boundary: &str, fault: Option<Fault>) -> Vec<u8> {
    let eol: &[u8] = if fault == Some(Fault::Legacy) { b"\n" } else { b"\r\n" };
    let mut out = Vec::new();
    if fault == Some(Fault::Legacy) {
        out.extend_from_slice(b"HTTP MIME Message\n\n");
    }

    for (i, response) in responses.iter().enumerate() {
        let mut message = Vec::new();
        if fault != Some(Fault::Legacy) {
            message.extend_from_slice(b"HTTP/1.1 ");
        }
        message.extend_from_slice(format!("{} {}", response.status, response.reason).as_bytes());
        message.extend_from_slice(eol);
        for (name, value) in &response.headers {
            message.extend_from_slice(format!("{name}: {value}").as_bytes());
            message.extend_from_slice(eol);
        }
        if !(fault == Some(Fault::Broken) && i == 0) {
            message.extend_from_slice(eol);
            message.extend_from_slice(&response.body);
        }

        out.extend_from_slice(format!("--{boundary}").as_bytes());
        out.extend_from_slice(eol);
        out.extend_from_slice(b"Content-Type: application/http-response");
        out.extend_from_slice(eol);
        out.extend_from_slice(format!("Multipart-Request-ID: {}", i + 1).as_bytes());
        out.extend_from_slice(eol);
        if fault == Some(Fault::QuotedPrintable) {
            out.extend_from_slice(b"Content-Transfer-Encoding: quoted-printable");
            out.extend_from_slice(eol);
            message = quoted_printable(&message);
        }
        out.extend_from_slice(eol);
        out.extend_from_slice(&message);
        out.extend_from_slice(eol);
    }

    out.extend_from_slice(format!("--{boundary}--").as_bytes());
    out.extend_from_slice(eol);
    out
}

/// Escape everything outside printable ASCII, and `=` itself.
fn quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 3 / 2);
    for &b in input {
        if (b' '..=b'~').contains(&b) && b != b'=' {
            out.push(b);
        } else {
            out.extend_from_slice(format!("={b:02X}").as_bytes());
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}
