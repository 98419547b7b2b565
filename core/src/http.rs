//! HTTP messages as plain data.
//!
//! # Design
//! The outer batch exchange and the subrequests/subresponses it carries are
//! all described as plain values. The core never opens a socket: the outer
//! `HttpRequest` is handed to a transport (or to the host) and the resulting
//! `HttpResponse` is handed back for dispatching.
//!
//! Headers are ordered `(name, value)` pairs. Duplicates are kept as separate
//! entries and names keep the casing they were given; only lookups ignore
//! ASCII case.

use std::fmt;
use std::str::FromStr;

use crate::error::BatchError;

/// HTTP method of a subrequest or of the outer request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    /// Any extension method, kept verbatim.
    Other(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other(method) => method,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            other => HttpMethod::Other(other.to_string()),
        })
    }
}

/// The outer request carrying the multipart batch body.
///
/// Built by `BatchClient`; the transport (or host) is responsible for putting
/// it on the wire and returning the corresponding `HttpResponse`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// The outer response to a batch request, as returned by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// One logical request packed into a batch.
///
/// Immutable once added to a `BatchRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrequest {
    pub method: HttpMethod,
    /// Request target: an absolute URI or an origin-form path.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Subrequest {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, target)
    }

    /// Append a header. Existing headers of the same name are kept.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Check that the request line and headers can be written verbatim.
    ///
    /// Method and header names must be visible ASCII, the target must hold no
    /// whitespace or control characters, and no header value may contain a
    /// line break.
    pub fn validate(&self) -> Result<(), BatchError> {
        let invalid = |reason: String| -> Result<(), BatchError> { Err(BatchError::InvalidSubrequest(reason)) };

        let method = self.method.as_str();
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_graphic()) {
            return invalid(format!("method {method:?}"));
        }
        if self.target.is_empty() || self.target.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return invalid(format!("target {:?}", self.target));
        }
        for (name, value) in &self.headers {
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
                return invalid(format!("header name {name:?}"));
            }
            if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
                return invalid(format!("value of header {name:?}"));
            }
        }
        Ok(())
    }
}

/// One logical response unpacked from a batch response.
///
/// Only produced by decoding a response part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subresponse {
    /// Protocol version from the status line, when it carried one.
    pub version: Option<String>,
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Subresponse {
    /// First header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Every value of header `name`, in the order received.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// `scheme://authority` prefix of an absolute URI.
pub(crate) fn origin(uri: &str) -> Option<&str> {
    let scheme_end = uri.find("://")?;
    if scheme_end == 0 {
        return None;
    }
    let rest = &uri[scheme_end + 3..];
    let authority_len = rest.find(&['/', '?', '#'][..]).unwrap_or(rest.len());
    if authority_len == 0 {
        return None;
    }
    Some(&uri[..scheme_end + 3 + authority_len])
}

/// `host[:port]` of an absolute URI, without userinfo.
pub(crate) fn authority(uri: &str) -> Option<&str> {
    let origin = origin(uri)?;
    let authority = &origin[origin.find("://")? + 3..];
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    (!host.is_empty()).then_some(host)
}
