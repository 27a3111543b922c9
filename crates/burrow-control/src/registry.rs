//! In-process bridge: connected agents keyed by client id

use crate::{Bridge, BridgeError, Tunnel, TunnelError};
use async_trait::async_trait;
use burrow_proto::{Link, END_OF_STREAM};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Events delivered to a client's agent
#[derive(Debug)]
pub enum BridgeEvent {
    /// A new link was opened; frames for it follow
    NewLink {
        link: Arc<Link>,
        remote_addr: SocketAddr,
    },
    /// One frame for a link, to be acknowledged through the link
    Frame { link: Arc<Link>, data: Bytes },
}

impl BridgeEvent {
    /// Whether this is the end-of-stream marker closing a link
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, BridgeEvent::Frame { data, .. } if data.as_ref() == END_OF_STREAM)
    }
}

/// Represents a connected agent
struct AgentConnection {
    events: mpsc::Sender<BridgeEvent>,
}

/// Manages the agents of all connected clients
pub struct BridgeRegistry {
    agents: Arc<RwLock<HashMap<u32, AgentConnection>>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register the agent of a client, replacing any previous one.
    /// Returns the receiver the agent consumes its events from.
    pub async fn register_agent(&self, client_id: u32, buffer: usize) -> mpsc::Receiver<BridgeEvent> {
        let (events, rx) = mpsc::channel(buffer.max(1));
        self.agents
            .write()
            .await
            .insert(client_id, AgentConnection { events });
        debug!("Agent registered for client {}", client_id);
        rx
    }

    pub async fn unregister_agent(&self, client_id: u32) {
        self.agents.write().await.remove(&client_id);
        debug!("Agent unregistered for client {}", client_id);
    }

    pub async fn is_connected(&self, client_id: u32) -> bool {
        self.agents
            .read()
            .await
            .get(&client_id)
            .map(|agent| !agent.events.is_closed())
            .unwrap_or(false)
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bridge for BridgeRegistry {
    async fn send_link_info(
        &self,
        client_id: u32,
        link: Arc<Link>,
        remote_addr: SocketAddr,
    ) -> Result<Arc<dyn Tunnel>, BridgeError> {
        let events = self
            .agents
            .read()
            .await
            .get(&client_id)
            .map(|agent| agent.events.clone())
            .ok_or(BridgeError::ClientUnreachable(client_id))?;

        debug!(
            "Opening link {} to client {} (target {})",
            link.id(),
            client_id,
            link.target()
        );

        if events
            .send(BridgeEvent::NewLink { link, remote_addr })
            .await
            .is_err()
        {
            self.unregister_agent(client_id).await;
            return Err(BridgeError::BridgeClosed(client_id));
        }

        Ok(Arc::new(ChannelTunnel { events }))
    }
}

/// Tunnel writing frames into an agent's event channel
pub struct ChannelTunnel {
    events: mpsc::Sender<BridgeEvent>,
}

#[async_trait]
impl Tunnel for ChannelTunnel {
    async fn send_msg(&self, data: Bytes, link: &Arc<Link>) -> Result<usize, TunnelError> {
        let len = data.len();
        if let Some(rate) = link.rate() {
            rate.acquire(len).await;
        }

        self.events
            .send(BridgeEvent::Frame {
                link: link.clone(),
                data,
            })
            .await
            .map_err(|_| TunnelError::Closed(link.id()))?;
        Ok(len)
    }
}
