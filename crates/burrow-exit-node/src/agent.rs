//! Direct agent: serves a client's links from the relay itself
//!
//! Every link runs in its own task with its own TCP connection to the link's
//! target, so a slow or unreachable target only stalls its own link. Frames
//! are written to that connection and acknowledged once written; whatever the
//! target answers is streamed back to the edge through the link. A link task
//! ends on the end-of-stream frame, when its session releases the link, or
//! when the edge stops accepting data.

use burrow_control::BridgeEvent;
use burrow_proto::{Link, LinkId};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 11\r\nConnection: close\r\n\r\nBad Gateway";

/// Frames queued per link. Sessions keep at most one frame unacknowledged,
/// plus the end-of-stream marker.
const LINK_QUEUE: usize = 4;

pub async fn run_direct_agent(client_id: u32, mut events: mpsc::Receiver<BridgeEvent>) {
    info!("Direct agent running for client {}", client_id);
    let mut links: HashMap<LinkId, mpsc::Sender<Bytes>> = HashMap::new();

    while let Some(event) = events.recv().await {
        let end_of_stream = event.is_end_of_stream();
        match event {
            BridgeEvent::NewLink { link, remote_addr } => {
                debug!(
                    "Link {} from {} dialing {}",
                    link.id(),
                    remote_addr,
                    link.target()
                );
                links.retain(|_, frames| !frames.is_closed());
                let (frames, rx) = mpsc::channel(LINK_QUEUE);
                links.insert(link.id(), frames);
                tokio::spawn(serve_link(link, rx));
            }
            BridgeEvent::Frame { link, .. } if end_of_stream => {
                // Dropping the sender lets the link task finish its queue and stop
                links.remove(&link.id());
                debug!("Link {} closed", link.id());
            }
            BridgeEvent::Frame { link, data } => {
                let queued = links
                    .get(&link.id())
                    .map(|frames| frames.try_send(data).is_ok())
                    .unwrap_or(false);
                if !queued {
                    links.remove(&link.id());
                    link.ack().await;
                }
            }
        }
    }

    info!("Direct agent for client {} stopped", client_id);
}

/// Drive one link until it ends, acknowledging every frame it was handed
async fn serve_link(link: Arc<Link>, mut frames: mpsc::Receiver<Bytes>) {
    let connected = tokio::select! {
        _ = link.closed() => None,
        result = TcpStream::connect(link.target()) => Some(result),
    };

    match connected {
        Some(Ok(stream)) => relay_link(&link, stream, &mut frames).await,
        Some(Err(e)) => {
            warn!(
                "Failed to connect to {} for link {}: {}",
                link.target(),
                link.id(),
                e
            );
            let _ = link.write_to_edge(BAD_GATEWAY).await;
        }
        None => {}
    }

    // Frames nobody will write still need their acknowledgment
    frames.close();
    while frames.recv().await.is_some() {
        link.ack().await;
    }
    debug!("Link {} released", link.id());
}

async fn relay_link(link: &Link, stream: TcpStream, frames: &mut mpsc::Receiver<Bytes>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; 16 * 1024];
    let mut target_open = true;

    loop {
        tokio::select! {
            _ = link.closed() => break,
            frame = frames.recv() => {
                let Some(data) = frame else { break };
                tokio::select! {
                    _ = link.closed() => break,
                    written = writer.write_all(&data) => {
                        if let Err(e) = written {
                            warn!("Write to {} failed on link {}: {}", link.target(), link.id(), e);
                        }
                    }
                }
                link.ack().await;
            }
            read = reader.read(&mut buf), if target_open => match read {
                Ok(0) => target_open = false,
                Ok(n) => {
                    if link.write_to_edge(&buf[..n]).await.is_err() {
                        debug!("Edge of link {} went away", link.id());
                        break;
                    }
                }
                Err(e) => {
                    debug!("Read from {} failed: {}", link.target(), e);
                    target_open = false;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
}
