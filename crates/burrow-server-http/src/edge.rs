//! Edge connections: the raw byte stream of a public client
//!
//! The read side stays with the session, which pulls pipelined requests from
//! it. The write side is shared with every link of the session so the bridge
//! can stream responses back.

use burrow_proto::{EdgeWriter, HttpRequest, ParseError, MAX_BODY_SIZE, MAX_HEAD_SIZE};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Connection closed mid-request")]
    UnexpectedEof,
}

pub struct EdgeConnection {
    reader: BufReader<Box<dyn AsyncRead + Send + Sync + Unpin>>,
    writer: EdgeWriter,
    peer_addr: SocketAddr,
}

impl EdgeConnection {
    pub fn new<S>(stream: S, peer_addr: SocketAddr) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: Box<dyn AsyncRead + Send + Sync + Unpin> = Box::new(read_half);
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(Box::new(write_half))),
            peer_addr,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Shared handle to the write side, handed to links
    pub fn writer(&self) -> EdgeWriter {
        self.writer.clone()
    }

    /// Read the next complete request, body included.
    /// Returns `None` on a clean end of stream between requests.
    pub async fn read_request(&mut self) -> Result<Option<HttpRequest>, EdgeError> {
        let mut head = Vec::with_capacity(1024);
        loop {
            let n = self
                .read_line_capped(&mut head, MAX_HEAD_SIZE, || {
                    ParseError::HeadTooLarge(MAX_HEAD_SIZE)
                })
                .await?;
            if n == 0 {
                return if head.is_empty() {
                    Ok(None)
                } else {
                    Err(EdgeError::UnexpectedEof)
                };
            }
            // Empty lines before a request line are ignored (RFC 9112 2.2)
            if head == b"\r\n" || head == b"\n" {
                head.clear();
                continue;
            }
            if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
                break;
            }
        }

        let (mut request, _) = HttpRequest::parse_head(&head)?
            .ok_or_else(|| ParseError::Malformed("incomplete request head".to_string()))?;

        request.body = if request.is_chunked() {
            self.read_chunked_body().await?
        } else {
            match request.content_length()? {
                Some(len) if len > MAX_BODY_SIZE => {
                    return Err(ParseError::BodyTooLarge(MAX_BODY_SIZE).into());
                }
                Some(len) if len > 0 => {
                    let mut body = Vec::new();
                    self.read_exact_to_end(&mut body, len).await?;
                    Bytes::from(body)
                }
                _ => Bytes::new(),
            }
        };

        Ok(Some(request))
    }

    /// Read a chunked body verbatim, framing and trailers included
    async fn read_chunked_body(&mut self) -> Result<Bytes, EdgeError> {
        let mut body = Vec::new();
        let mut line = Vec::new();
        let too_large = || ParseError::BodyTooLarge(MAX_BODY_SIZE);
        loop {
            line.clear();
            let room = MAX_BODY_SIZE.saturating_sub(body.len()).min(MAX_HEAD_SIZE);
            if self.read_line_capped(&mut line, room, too_large).await? == 0 {
                return Err(EdgeError::UnexpectedEof);
            }
            body.extend_from_slice(&line);

            let size_str = String::from_utf8_lossy(&line);
            let size_str = size_str.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_str, 16)
                .map_err(|_| ParseError::InvalidChunk(size_str.to_string()))?;

            if size == 0 {
                // Trailer section ends with an empty line
                loop {
                    line.clear();
                    let room = MAX_BODY_SIZE.saturating_sub(body.len()).min(MAX_HEAD_SIZE);
                    if self.read_line_capped(&mut line, room, too_large).await? == 0 {
                        return Err(EdgeError::UnexpectedEof);
                    }
                    body.extend_from_slice(&line);
                    if line == b"\r\n" || line == b"\n" {
                        return Ok(Bytes::from(body));
                    }
                }
            }

            // Chunk data plus its trailing CRLF
            let total = size
                .checked_add(2)
                .and_then(|n| n.checked_add(body.len()))
                .filter(|&n| n <= MAX_BODY_SIZE)
                .ok_or_else(too_large)?;
            let remaining = total - body.len();
            self.read_exact_to_end(&mut body, remaining).await?;
        }
    }

    /// Append one line to `buf`, failing once `buf` would exceed `max_len`.
    /// Never buffers more than `max_len + 1` bytes.
    async fn read_line_capped(
        &mut self,
        buf: &mut Vec<u8>,
        max_len: usize,
        overflow: impl Fn() -> ParseError,
    ) -> Result<usize, EdgeError> {
        let limit = (max_len + 1).saturating_sub(buf.len()) as u64;
        let n = (&mut self.reader).take(limit).read_until(b'\n', buf).await?;
        if buf.len() > max_len {
            return Err(overflow().into());
        }
        Ok(n)
    }

    /// Append exactly `len` bytes to `buf`, growing it only as data arrives
    async fn read_exact_to_end(&mut self, buf: &mut Vec<u8>, len: usize) -> Result<(), EdgeError> {
        let n = (&mut self.reader)
            .take(len as u64)
            .read_to_end(buf)
            .await?;
        if n < len {
            return Err(EdgeError::UnexpectedEof);
        }
        Ok(())
    }

    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Shut down the write side; the read side is released when the connection is dropped
    pub async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_pair() -> (EdgeConnection, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            EdgeConnection::new(server, "198.51.100.7:40000".parse().unwrap()),
            client,
        )
    }

    #[tokio::test]
    async fn test_reads_pipelined_requests() {
        let (mut edge, mut client) = edge_pair();
        client
            .write_all(
                b"POST /a HTTP/1.1\r\nHost: a.example.com\r\nContent-Length: 5\r\n\r\nhello\
                  GET /b HTTP/1.1\r\nHost: b.example.com\r\n\r\n",
            )
            .await
            .unwrap();
        drop(client);

        let first = edge.read_request().await.unwrap().unwrap();
        assert_eq!(first.host(), "a.example.com");
        assert_eq!(first.body.as_ref(), b"hello");

        let second = edge.read_request().await.unwrap().unwrap();
        assert_eq!(second.host(), "b.example.com");
        assert!(second.body.is_empty());

        assert!(edge.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_chunked_body_verbatim() {
        let (mut edge, mut client) = edge_pair();
        let chunked: &[u8] = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let mut raw = b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        raw.extend_from_slice(chunked);
        client.write_all(&raw).await.unwrap();

        let request = edge.read_request().await.unwrap().unwrap();
        assert_eq!(request.body.as_ref(), chunked);
        assert_eq!(request.to_bytes().as_ref(), raw.as_slice());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (mut edge, mut client) = edge_pair();
        client
            .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        drop(client);

        assert!(matches!(
            edge.read_request().await,
            Err(EdgeError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_a_parse_error() {
        let (mut edge, mut client) = edge_pair();
        client.write_all(b"\x16\x03\x01 hello\r\n\r\n").await.unwrap();

        assert!(matches!(edge.read_request().await, Err(EdgeError::Parse(_))));
    }

    #[tokio::test]
    async fn test_leading_blank_lines_skipped() {
        let (mut edge, mut client) = edge_pair();
        client
            .write_all(b"\r\n\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();

        let request = edge.read_request().await.unwrap().unwrap();
        assert_eq!(request.method, "GET");
    }

    #[tokio::test]
    async fn test_write_and_close() {
        let (edge, mut client) = edge_pair();
        edge.write_all(b"bye").await.unwrap();
        edge.close().await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected_before_reading() {
        let (mut edge, mut client) = edge_pair();
        client
            .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 18446744073709551615\r\n\r\n")
            .await
            .unwrap();

        assert!(matches!(
            edge.read_request().await,
            Err(EdgeError::Parse(ParseError::BodyTooLarge(MAX_BODY_SIZE)))
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let (mut edge, mut client) = edge_pair();
        client
            .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\n")
            .await
            .unwrap();

        assert!(matches!(
            edge.read_request().await,
            Err(EdgeError::Parse(ParseError::BodyTooLarge(MAX_BODY_SIZE)))
        ));
    }

    #[tokio::test]
    async fn test_endless_head_line_rejected() {
        let (client, server) = tokio::io::duplex(8 * 1024);
        let mut edge = EdgeConnection::new(server, "198.51.100.7:40000".parse().unwrap());
        let writer = tokio::spawn(async move {
            let mut client = client;
            let filler = vec![b'a'; 4096];
            // Keep feeding a line that never ends until the edge gives up
            while client.write_all(&filler).await.is_ok() {}
        });

        assert!(matches!(
            edge.read_request().await,
            Err(EdgeError::Parse(ParseError::HeadTooLarge(MAX_HEAD_SIZE)))
        ));
        drop(edge);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_endless_trailer_line_rejected() {
        let (client, server) = tokio::io::duplex(8 * 1024);
        let mut edge = EdgeConnection::new(server, "198.51.100.7:40000".parse().unwrap());
        let writer = tokio::spawn(async move {
            let mut client = client;
            client
                .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n0\r\nX-Pad: ")
                .await
                .unwrap();
            let filler = vec![b'a'; 4096];
            while client.write_all(&filler).await.is_ok() {}
        });

        assert!(matches!(
            edge.read_request().await,
            Err(EdgeError::Parse(ParseError::BodyTooLarge(_)))
        ));
        drop(edge);
        writer.await.unwrap();
    }
}
