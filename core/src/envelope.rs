//! Envelope codec: subrequests to MIME parts, MIME parts to subresponses.
//!
//! # Design
//! A request part carries `Content-Type: application/http-request` and, as
//! its content, the HTTP/1.1 message itself: request line, headers, blank
//! line, raw body. No transfer encoding is applied on the way out; the
//! multipart boundary alone frames the part. Encoding is deterministic.
//!
//! Subresponses are asked for uncompressed (`Accept-Encoding: identity`)
//! unless the caller chose an encoding: content codings rarely survive a
//! batch processor's re-framing.
//!
//! A response part carries an HTTP response message. Its status line may
//! omit the protocol version (`200 OK`), as some batch processors write it.

use crate::error::DecodeError;
use crate::http::{authority, Subrequest, Subresponse};
use crate::multipart::{parse_header_lines, split_head, ContentType, MimePart};
use crate::transfer;

pub const HTTP_REQUEST_TYPE: &str = "application/http-request";
pub const HTTP_RESPONSE_TYPE: &str = "application/http-response";

const HTTP_VERSION: &str = "HTTP/1.1";

/// Encode `subrequest` as an `application/http-request` part.
///
/// When the target is an absolute URI and no `Host` header was given, a
/// `Host` header derived from the target comes first. `Accept-Encoding:
/// identity` follows unless the subrequest names its own `Accept-Encoding`.
///
/// Values are written verbatim; `BatchRequest::add` rejects subrequests that
/// fail `Subrequest::validate`.
pub fn encode_subrequest(subrequest: &Subrequest) -> MimePart {
    let body_len = subrequest.body.as_ref().map_or(0, Vec::len);
    let mut message = Vec::with_capacity(body_len + 128);

    message.extend_from_slice(subrequest.method.as_str().as_bytes());
    message.push(b' ');
    message.extend_from_slice(subrequest.target.as_bytes());
    message.push(b' ');
    message.extend_from_slice(HTTP_VERSION.as_bytes());
    message.extend_from_slice(b"\r\n");

    let has = |name: &str| subrequest.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name));
    if !has("host") {
        if let Some(host) = authority(&subrequest.target) {
            append_line(&mut message, "Host", host);
        }
    }
    if !has("accept-encoding") {
        append_line(&mut message, "Accept-Encoding", "identity");
    }
    for (name, value) in &subrequest.headers {
        append_line(&mut message, name, value);
    }
    message.extend_from_slice(b"\r\n");
    if let Some(body) = &subrequest.body {
        message.extend_from_slice(body);
    }

    MimePart::new(
        vec![("Content-Type".to_string(), HTTP_REQUEST_TYPE.to_string())],
        message,
    )
}

/// Decode an `application/http-response` part.
///
/// Parts without a Content-Type are accepted. Fails when the part declares
/// another content type or an unsupported transfer encoding, when the status
/// line is invalid, or when the headers are not followed by a blank line.
pub fn decode_subresponse(part: &MimePart) -> Result<Subresponse, DecodeError> {
    if let Some(value) = part.header("Content-Type") {
        let is_response = ContentType::parse(value).is_some_and(|ct| ct.is_mime_type("application", "http-response"));
        if !is_response {
            return Err(DecodeError::new(format!("unexpected part content type: {value}")));
        }
    }

    let message = transfer::decode(part.header("Content-Transfer-Encoding"), &part.body)?;
    let (head, body) = split_head(&message).ok_or_else(|| DecodeError::new("headers not terminated by a blank line"))?;
    let line_end = head
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| DecodeError::new("missing status line"))?;
    let line = String::from_utf8_lossy(&head[..line_end]);
    let status = parse_status_line(line.trim_end_matches('\r'))?;
    let headers = parse_header_lines(&head[line_end + 1..])?;

    Ok(Subresponse {
        version: status.version,
        status: status.status,
        reason: status.reason,
        headers,
        body: (!body.is_empty()).then(|| body.to_vec()),
    })
}

/// The leading line of a response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Option<String>,
    pub status: u16,
    pub reason: Option<String>,
}

/// Parse `HTTP/1.1 404 Not Found` or `404 Not Found`.
pub fn parse_status_line(line: &str) -> Result<StatusLine, DecodeError> {
    let invalid = || DecodeError::new(format!("invalid status line: {line:?}"));

    let (version, rest) = match line.strip_prefix("HTTP/") {
        Some(_) => {
            let (version, rest) = line.split_once(' ').ok_or_else(invalid)?;
            (Some(version.to_string()), rest.trim_start())
        }
        None => (None, line),
    };
    let (code, reason) = match rest.split_once(' ') {
        Some((code, reason)) => (code, reason.trim()),
        None => (rest, ""),
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let status = code.parse().map_err(|_| invalid())?;

    Ok(StatusLine {
        version,
        status,
        reason: (!reason.is_empty()).then(|| reason.to_string()),
    })
}

fn append_line(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}
