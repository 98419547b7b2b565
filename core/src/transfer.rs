//! Content-Transfer-Encoding decoding for received parts (RFC 2045).
//!
//! Batch processors may wrap each response part in `quoted-printable` or
//! `base64`. Identity encodings pass the content through untouched.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::DecodeError;

/// Decode `content` according to the part's `Content-Transfer-Encoding`.
pub fn decode<'a>(encoding: Option<&str>, content: &'a [u8]) -> Result<Cow<'a, [u8]>, DecodeError> {
    let Some(encoding) = encoding.map(str::trim) else {
        return Ok(Cow::Borrowed(content));
    };
    match encoding.to_ascii_lowercase().as_str() {
        "" | "7bit" | "8bit" | "binary" => Ok(Cow::Borrowed(content)),
        "quoted-printable" => Ok(Cow::Owned(decode_quoted_printable(content))),
        "base64" => decode_base64(content).map(Cow::Owned),
        other => Err(DecodeError::new(format!("unsupported transfer encoding: {other}"))),
    }
}

fn decode_base64(content: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let compact: Vec<u8> = content.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| DecodeError::new(format!("invalid base64 content: {e}")))
}

/// Decode `=XX` escapes and drop soft line breaks (`=CRLF`, `=LF`).
/// Invalid escapes are kept literally.
fn decode_quoted_printable(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0;
    while pos < src.len() {
        let b = src[pos];
        if b != b'=' {
            out.push(b);
            pos += 1;
            continue;
        }
        match (src.get(pos + 1).copied(), src.get(pos + 2).copied()) {
            (Some(b'\r'), Some(b'\n')) => pos += 3,
            (Some(b'\n'), _) => pos += 2,
            (Some(hi), Some(lo)) => match (hex_value(hi), hex_value(lo)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    pos += 3;
                }
                _ => {
                    out.push(b);
                    pos += 1;
                }
            },
            _ => {
                out.push(b);
                pos += 1;
            }
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
