//! Fallback document served when a request cannot be routed

use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use tracing::{debug, warn};

const BUILTIN_PAGE: &str = "<html><head><title>404 Not Found</title></head>\
<body><h1>404 Not Found</h1><p>The requested host is not available.</p></body></html>";

/// Pre-rendered 404 response
#[derive(Debug, Clone)]
pub struct ErrorPage {
    response: Bytes,
}

impl ErrorPage {
    pub fn new(body: impl AsRef<[u8]>) -> Self {
        let body = body.as_ref();
        let head = format!(
            "HTTP/1.1 404 Not Found\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            body.len()
        );
        let mut response = BytesMut::with_capacity(head.len() + body.len());
        response.put_slice(head.as_bytes());
        response.put_slice(body);
        Self {
            response: response.freeze(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_PAGE)
    }

    /// Load the document at `path`, falling back to the built-in page
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };
        match std::fs::read(path) {
            Ok(body) => {
                debug!("Loaded error page from {}", path.display());
                Self::new(body)
            }
            Err(e) => {
                warn!(
                    "Failed to read error page {}: {}, using built-in page",
                    path.display(),
                    e
                );
                Self::builtin()
            }
        }
    }

    /// Full response bytes, status line included
    pub fn response(&self) -> &Bytes {
        &self.response
    }
}

impl Default for ErrorPage {
    fn default() -> Self {
        Self::builtin()
    }
}
