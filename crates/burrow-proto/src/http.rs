//! HTTP/1.x request representation relayed over tunnels
//!
//! Heads are parsed with httparse. Header order and spelling are preserved so
//! that serializing a request only changes what a rewrite rule touched. Header
//! values are kept as raw bytes since obs-text is legal on the wire.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum number of headers to parse
const MAX_HEADERS: usize = 100;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Malformed chunked body: {0}")]
    InvalidChunk(String),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// A complete HTTP request: head plus raw body bytes
///
/// For chunked requests the body keeps its chunk framing so the request can
/// be re-serialized byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request target as sent (origin form, absolute form or `*`)
    pub target: String,
    /// HTTP minor version (0 or 1)
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl HttpRequest {
    /// Parse a request head. Returns the request without body and the number of
    /// bytes the head occupied, or `None` if the head is incomplete.
    pub fn parse_head(buf: &[u8]) -> Result<Option<(Self, usize)>, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.unwrap_or_default().to_string();
                let target = req.path.unwrap_or_default().to_string();
                let version = req.version.unwrap_or(1);
                let headers = req
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), h.value.to_vec()))
                    .collect();

                Ok(Some((
                    Self {
                        method,
                        target,
                        version,
                        headers,
                        body: Bytes::new(),
                    },
                    head_len,
                )))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(ParseError::Malformed(e.to_string())),
        }
    }

    /// First header value with the given name (case-insensitive), raw bytes
    pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First header value with the given name, `None` if absent or not UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_bytes(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Host header value, empty if absent
    pub fn host(&self) -> &str {
        self.header("host").unwrap_or_default()
    }

    /// Request path without query string
    pub fn path(&self) -> &str {
        let target = self.target.as_str();
        // Absolute form: http://host/path?query
        let target = match target.find("://") {
            Some(scheme_end) => {
                let rest = &target[scheme_end + 3..];
                rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
            }
            None => target,
        };
        target.split('?').next().unwrap_or(target)
    }

    /// Set a header, replacing every existing value of that name.
    /// The first occurrence keeps its position; a new header is appended.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let mut replaced = false;
        self.headers.retain_mut(|(n, v)| {
            if !n.eq_ignore_ascii_case(name) {
                return true;
            }
            if replaced {
                return false;
            }
            *v = value.as_bytes().to_vec();
            replaced = true;
            true
        });
        if !replaced {
            self.headers.push((name.to_string(), value.as_bytes().to_vec()));
        }
    }

    pub fn set_host(&mut self, host: &str) {
        self.set_header("Host", host);
    }

    /// Declared body length, `None` when no Content-Length header is present
    pub fn content_length(&self) -> Result<Option<usize>, ParseError> {
        match self.header_bytes("content-length") {
            Some(value) => std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Some)
                .ok_or_else(|| {
                    ParseError::InvalidContentLength(String::from_utf8_lossy(value).into_owned())
                }),
            None => Ok(None),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.header_bytes("transfer-encoding")
            .map(|v| {
                v.windows(b"chunked".len())
                    .any(|w| w.eq_ignore_ascii_case(b"chunked"))
            })
            .unwrap_or(false)
    }

    /// Serialize the request, head and body, into raw bytes
    pub fn to_bytes(&self) -> Bytes {
        let head_len = self.method.len()
            + self.target.len()
            + 16
            + self
                .headers
                .iter()
                .map(|(n, v)| n.len() + v.len() + 4)
                .sum::<usize>();
        let mut buf = BytesMut::with_capacity(head_len + self.body.len());

        buf.put_slice(self.method.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.target.as_bytes());
        buf.put_slice(format!(" HTTP/1.{}\r\n", self.version).as_bytes());
        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);

        buf.freeze()
    }
}
