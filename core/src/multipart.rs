//! `multipart/mixed` assembly and parsing (RFC 2046 framing).
//!
//! # Design
//! Assembly picks a fresh boundary token per document and checks it against
//! every encoded part before framing, regenerating on collision up to a
//! bounded number of attempts. Parsing never guesses a boundary: it is read
//! from the outer message's Content-Type and the body is split in a single
//! forward scan. Parsing accepts a preamble and an epilogue, transport padding
//! after delimiters, and bare LF line endings; assembly always writes CRLF.

use tracing::debug;
use uuid::Uuid;

use crate::error::{BatchError, DecodeError};
use crate::http::find_header;

/// One body part of a multipart document: MIME headers plus raw content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MimePart {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MimePart {
    pub fn new(headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Serialize as it appears between two delimiter lines.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 64);
        for (name, value) in &self.headers {
            append_header(&mut out, name, value);
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// An assembled multipart document and the boundary that frames it.
#[derive(Debug, Clone)]
pub struct Multipart {
    pub boundary: String,
    pub body: Vec<u8>,
}

impl Multipart {
    /// Content-Type value announcing this document's boundary.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary=\"{}\"", self.boundary)
    }
}

/// A fresh boundary token: `batch_` and a v4 UUID in simple form.
pub fn generate_boundary() -> String {
    format!("batch_{}", Uuid::new_v4().simple())
}

/// Assemble `parts` under a randomly generated boundary.
pub fn assemble(parts: &[MimePart], max_attempts: u32) -> Result<Multipart, BatchError> {
    assemble_with(parts, max_attempts, generate_boundary)
}

/// Assemble `parts`, drawing boundary candidates from `next_boundary`.
///
/// A candidate is rejected when its delimiter occurs anywhere inside an
/// encoded part. Fails with `BoundaryCollision` once `max_attempts`
/// candidates (at least one) have been rejected.
pub fn assemble_with<F>(parts: &[MimePart], max_attempts: u32, mut next_boundary: F) -> Result<Multipart, BatchError>
where
    F: FnMut() -> String,
{
    let encoded: Vec<Vec<u8>> = parts.iter().map(MimePart::to_bytes).collect();
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let boundary = next_boundary();
        let delimiter = format!("--{boundary}");
        if encoded.iter().any(|part| find(part, delimiter.as_bytes(), 0).is_some()) {
            debug!(attempt, %boundary, "boundary occurs in part content, regenerating");
            continue;
        }
        let body = frame(&encoded, delimiter.as_bytes());
        return Ok(Multipart { boundary, body });
    }

    Err(BatchError::BoundaryCollision { attempts })
}

fn frame(encoded: &[Vec<u8>], delimiter: &[u8]) -> Vec<u8> {
    let size = encoded.iter().map(|p| p.len() + delimiter.len() + 4).sum::<usize>() + delimiter.len() + 4;
    let mut out = Vec::with_capacity(size);
    for part in encoded {
        out.extend_from_slice(delimiter);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(delimiter);
    out.extend_from_slice(b"--\r\n");
    out
}

/// Split a multipart `body` framed by `boundary` into its parts, in order.
///
/// Fails with `MalformedMultipart` when the document cannot be split (see
/// `split`) or when any part's header block is unreadable.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<MimePart>, BatchError> {
    split(body, boundary)?
        .into_iter()
        .enumerate()
        .map(|(i, part)| part.map_err(|e| malformed(format!("part {i}: {e}"))))
        .collect()
}

/// Split a multipart `body` framed by `boundary`, keeping each part's own
/// header failure next to its siblings.
///
/// Only framing failures fail the document: no opening or closing
/// delimiter, a part whose headers are not followed by a blank line, or no
/// parts at all. A part whose header block is present but unreadable comes
/// back as `Err` in its position.
pub fn split(body: &[u8], boundary: &str) -> Result<Vec<Result<MimePart, DecodeError>>, BatchError> {
    if boundary.is_empty() {
        return Err(malformed("empty boundary"));
    }
    if body.is_empty() {
        return Err(malformed("empty body"));
    }

    let delimiter = format!("--{boundary}").into_bytes();
    let mut pos = find_delimiter(body, &delimiter, 0).ok_or_else(|| malformed("no opening delimiter"))?;
    let mut parts = Vec::new();

    loop {
        let after = pos + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }
        let start = skip_delimiter_line(body, after)?;
        let next = find_delimiter(body, &delimiter, start).ok_or_else(|| malformed("no closing delimiter"))?;
        let end = trim_line_break(body, start, next);
        let (head, content) = split_head(&body[start..end])
            .ok_or_else(|| malformed(format!("part {}: headers not terminated by a blank line", parts.len())))?;
        parts.push(parse_header_lines(head).map(|headers| MimePart::new(headers, content.to_vec())));
        pos = next;
    }

    if parts.is_empty() {
        return Err(malformed("no parts"));
    }
    Ok(parts)
}

/// Split `bytes` at its first empty line into (header block, remainder).
///
/// The header block keeps its line terminators. Returns `None` when no empty
/// line occurs.
pub(crate) fn split_head(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut line_start = 0;
    while line_start < bytes.len() {
        let line_end = line_start + bytes[line_start..].iter().position(|&b| b == b'\n')?;
        let line = &bytes[line_start..line_end];
        if line.is_empty() || line == b"\r" {
            return Some((&bytes[..line_start], &bytes[line_end + 1..]));
        }
        line_start = line_end + 1;
    }
    None
}

/// Parse `Name: value` lines, unfolding continuation lines.
///
/// Names keep their casing; values are trimmed of surrounding whitespace.
pub(crate) fn parse_header_lines(head: &[u8]) -> Result<Vec<(String, String)>, DecodeError> {
    let text = String::from_utf8_lossy(head);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(&[' ', '\t'][..]) {
            let (_, value) = headers
                .last_mut()
                .ok_or_else(|| DecodeError::new("continuation line before any header"))?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| DecodeError::new(format!("header line without colon: {line:?}")))?;
        if name.is_empty() || name.ends_with(&[' ', '\t'][..]) {
            return Err(DecodeError::new(format!("invalid header name: {name:?}")));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(headers)
}

/// Find the next delimiter line at or after `from`.
///
/// A delimiter must start a line and be followed by `--`, whitespace, a line
/// break, or the end of input, so a longer token sharing the prefix is
/// skipped.
fn find_delimiter(body: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut from = from;
    while let Some(at) = find(body, delimiter, from) {
        let line_start = at == 0 || body[at - 1] == b'\n';
        let follow = body.get(at + delimiter.len()).copied();
        let terminated = matches!(follow, None | Some(b'-' | b' ' | b'\t' | b'\r' | b'\n'));
        if line_start && terminated {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

/// Skip transport padding and the line break after a delimiter.
fn skip_delimiter_line(body: &[u8], mut pos: usize) -> Result<usize, BatchError> {
    while matches!(body.get(pos), Some(b' ' | b'\t')) {
        pos += 1;
    }
    match body.get(pos) {
        Some(b'\n') => Ok(pos + 1),
        Some(b'\r') if body.get(pos + 1) == Some(&b'\n') => Ok(pos + 2),
        None => Err(malformed("no closing delimiter")),
        Some(_) => Err(malformed("unexpected data after delimiter")),
    }
}

/// End of a part's content: the line break before the next delimiter
/// belongs to the delimiter.
fn trim_line_break(body: &[u8], start: usize, delimiter_at: usize) -> usize {
    if delimiter_at >= start + 2 && &body[delimiter_at - 2..delimiter_at] == b"\r\n" {
        delimiter_at - 2
    } else if delimiter_at >= start + 1 && body[delimiter_at - 1] == b'\n' {
        delimiter_at - 1
    } else {
        delimiter_at
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}

fn append_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn malformed(reason: impl Into<String>) -> BatchError {
    BatchError::MalformedMultipart(reason.into())
}

/// A parsed Content-Type value (RFC 2045).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    primary_type: String,
    sub_type: String,
    parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a Content-Type header value. Returns `None` when there is no
    /// `type/subtype`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (media_type, params) = match value.split_once(';') {
            Some((media_type, params)) => (media_type.trim(), params),
            None => (value, ""),
        };
        let (primary, sub) = media_type.split_once('/')?;
        let (primary, sub) = (primary.trim(), sub.trim());
        if !is_token(primary) || !is_token(sub) {
            return None;
        }
        Some(Self {
            primary_type: primary.to_ascii_lowercase(),
            sub_type: sub.to_ascii_lowercase(),
            parameters: parse_parameters(params),
        })
    }

    pub fn primary_type(&self) -> &str {
        &self.primary_type
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn is_mime_type(&self, primary: &str, sub: &str) -> bool {
        self.primary_type.eq_ignore_ascii_case(primary) && self.sub_type.eq_ignore_ascii_case(sub)
    }

    pub fn is_multipart(&self) -> bool {
        self.primary_type == "multipart"
    }

    /// Parameter value by case-insensitive name, unquoted.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary").filter(|b| !b.is_empty())
    }
}

/// Parse `; name=value; name="quoted \" value"` parameter lists. Malformed
/// parameters are skipped.
fn parse_parameters(params: &str) -> Vec<(String, String)> {
    let mut parameters = Vec::new();
    let mut rest = params.trim_start_matches(&[';', ' ', '\t'][..]);

    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut end = quoted.len();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = i + 1;
                        break;
                    }
                    c => value.push(c),
                }
            }
            (value, &quoted[end..])
        } else {
            let end = after.find(';').unwrap_or(after.len());
            (after[..end].trim().to_string(), &after[end..])
        };

        if is_token(&name) {
            parameters.push((name, value));
        }
        rest = match remainder.find(';') {
            Some(i) => remainder[i..].trim_start_matches(&[';', ' ', '\t'][..]),
            None => "",
        };
    }

    parameters
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b))
}
