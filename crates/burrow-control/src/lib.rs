//! Bridge side of the relay
//!
//! A bridge is the multiplexed channel between the relay and a client's remote
//! agent. Sessions only see it through two traits: [`Bridge`] announces a new
//! link and hands back a [`Tunnel`], and the tunnel carries the link's frames.

pub mod registry;

pub use registry::{BridgeEvent, BridgeRegistry, ChannelTunnel};

use async_trait::async_trait;
use burrow_proto::Link;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Client {0} is not connected")]
    ClientUnreachable(u32),

    #[error("Bridge for client {0} closed")]
    BridgeClosed(u32),
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Tunnel closed for link {0}")]
    Closed(u32),
}

/// Write handle for one link's frames
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Forward one frame tagged with `link`. Returns the number of bytes accepted.
    ///
    /// The remote side acknowledges each accepted frame through the link's
    /// ack channel, in write order.
    async fn send_msg(&self, data: Bytes, link: &Arc<Link>) -> Result<usize, TunnelError>;
}

/// Entry point for opening links towards a client's agent
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Announce `link` to the agent of `client_id`
    async fn send_link_info(
        &self,
        client_id: u32,
        link: Arc<Link>,
        remote_addr: SocketAddr,
    ) -> Result<Arc<dyn Tunnel>, BridgeError>;
}
