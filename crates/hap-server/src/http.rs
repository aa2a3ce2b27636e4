//! HTTP/1.1 framing inside the (possibly encrypted) session stream.
//!
//! The parser is incremental: bytes accumulate in a buffer and
//! `parse_request` returns a request once the head and the declared body
//! are complete, draining what it consumed. Responses and unsolicited
//! `EVENT/1.0` messages serialize into the same stream.

use std::collections::HashMap;

use hap_core::error::ParseError;

/// Content type for HAP JSON bodies.
pub const CONTENT_TYPE_JSON: &str = "application/hap+json";
/// Content type for pairing TLV bodies.
pub const CONTENT_TYPE_TLV: &str = "application/pairing+tlv8";

/// A parsed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Try to parse one complete request from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. Consumed bytes are
/// drained from the buffer so pipelined requests parse on subsequent
/// calls.
pub fn parse_request(buf: &mut Vec<u8>) -> Result<Option<HttpRequest>, ParseError> {
    let Some(header_end) = find_header_end(buf) else {
        return Ok(None);
    };

    let header_bytes = &buf[..header_end];
    let header_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidFormat("invalid UTF-8 in request head".to_string()))?;

    let mut lines = header_str.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| ParseError::InvalidFormat("missing request line".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ParseError::InvalidFormat("missing method".to_string()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| ParseError::InvalidFormat("missing request target".to_string()))?
        .to_string();
    let version = parts
        .next()
        .ok_or_else(|| ParseError::InvalidFormat("missing HTTP version".to_string()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidFormat(format!(
            "unsupported protocol version {version:?}"
        )));
    }

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidFormat(format!("bad Content-Length {v:?}")))?,
        None => 0,
    };

    let body_start = header_end + 4;
    if buf.len() < body_start + content_length {
        return Ok(None);
    }

    let body = buf[body_start..body_start + content_length].to_vec();
    buf.drain(..body_start + content_length);

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (target.to_string(), HashMap::new()),
    };

    Ok(Some(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse a query string into key/value pairs.
fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// An outgoing HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, content_type: &'static str, body: Vec<u8>) -> Self {
        self.content_type = Some(content_type);
        self.body = body;
        self
    }

    /// Serialize to wire format.
    ///
    /// Content-Length is always emitted when a body is present; chunked
    /// encoding can stall controllers.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 128);
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        if let Some(content_type) = self.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Serialize an unsolicited `EVENT/1.0` message carrying a HAP JSON body.
///
/// These interleave with request/response traffic on the same session
/// stream.
pub fn event_message(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 96);
    out.extend_from_slice(b"EVENT/1.0 200 OK\r\n");
    out.extend_from_slice(format!("Content-Type: {CONTENT_TYPE_JSON}\r\n").as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}
