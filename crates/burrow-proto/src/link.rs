//! Links: one logical proxied stream multiplexed over a client's bridge

use crate::compress::{Codec, CompressMode};
use crate::flow::Flow;
use crate::rate::RateLimiter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, Notify};

/// Link identifier, unique per bridge
pub type LinkId = u32;

/// Write side of an edge connection, shared between a session and the bridge
pub type EdgeWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Kind of stream the remote side should open towards the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    Tcp,
    Udp,
}

/// Parameters describing a link, fixed at creation
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub client_id: u32,
    pub conn_type: ConnType,
    /// Backend address the remote agent connects to
    pub target: String,
    pub compress: CompressMode,
    pub crypt: bool,
    /// Address of the edge peer that opened the connection
    pub remote_addr: SocketAddr,
}

/// Per-stream descriptor shared between a session and the bridge side
pub struct Link {
    id: LinkId,
    client_id: u32,
    conn_type: ConnType,
    target: String,
    encode: Codec,
    decode: Codec,
    crypt: bool,
    remote_addr: SocketAddr,
    edge: EdgeWriter,
    flow: Arc<Flow>,
    rate: Option<Arc<RateLimiter>>,
    // Capacity 1: at most one frame is ever awaiting acknowledgment
    ack_tx: mpsc::Sender<()>,
    ack_rx: Mutex<mpsc::Receiver<()>>,
    started: AtomicBool,
    closed: AtomicBool,
    close_notify: Notify,
}

impl Link {
    pub fn new(
        options: LinkOptions,
        edge: EdgeWriter,
        flow: Arc<Flow>,
        rate: Option<Arc<RateLimiter>>,
    ) -> Self {
        let (encode, decode) = options.compress.codecs();
        let (ack_tx, ack_rx) = mpsc::channel(1);

        Self {
            id: rand::random::<u32>(),
            client_id: options.client_id,
            conn_type: options.conn_type,
            target: options.target,
            encode,
            decode,
            crypt: options.crypt,
            remote_addr: options.remote_addr,
            edge,
            flow,
            rate,
            ack_tx,
            ack_rx: Mutex::new(ack_rx),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn conn_type(&self) -> ConnType {
        self.conn_type
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Codec the remote side applies when sending towards the relay
    pub fn encode(&self) -> Codec {
        self.encode
    }

    /// Codec the remote side applies to frames coming from the relay
    pub fn decode(&self) -> Codec {
        self.decode
    }

    pub fn crypt(&self) -> bool {
        self.crypt
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn rate(&self) -> Option<&Arc<RateLimiter>> {
        self.rate.as_ref()
    }

    /// Mark the link as started
    pub fn run(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Release the link locally once its session is over.
    /// No frame is sent; the bridge side observes it through [`Link::closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the session that owns the link has ended
    pub async fn closed(&self) {
        let notified = self.close_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Signal that one relayed frame was consumed by the bridge side
    pub async fn ack(&self) -> bool {
        self.ack_tx.send(()).await.is_ok()
    }

    /// Wait for the acknowledgment of the frame in flight
    pub async fn wait_ack(&self) -> Option<()> {
        self.ack_rx.lock().await.recv().await
    }

    /// Write response bytes back to the edge connection, counting them as inlet flow
    pub async fn write_to_edge(&self, data: &[u8]) -> io::Result<()> {
        let mut edge = self.edge.lock().await;
        edge.write_all(data).await?;
        edge.flush().await?;
        self.flow.add(0, data.len() as u64);
        Ok(())
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("conn_type", &self.conn_type)
            .field("target", &self.target)
            .field("crypt", &self.crypt)
            .field("remote_addr", &self.remote_addr)
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .finish()
    }
}
