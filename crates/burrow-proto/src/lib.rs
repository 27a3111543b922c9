//! Burrow Protocol Definitions
//!
//! This crate defines the shared types used on both sides of the bridge:
//! links and their acknowledgment channel, flow accounting, compression modes,
//! rate limiting and the HTTP request representation relayed over tunnels.

pub mod compress;
pub mod flow;
pub mod http;
pub mod link;
pub mod rate;

pub use compress::{Codec, CompressMode};
pub use flow::Flow;
pub use http::{HttpRequest, ParseError};
pub use link::{ConnType, EdgeWriter, Link, LinkId, LinkOptions};
pub use rate::RateLimiter;

/// Marker frame telling the remote side that a link's edge connection is done
pub const END_OF_STREAM: &[u8] = b"PROXYEOF";

/// Maximum size of an HTTP request head (request line + headers)
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum size of a buffered HTTP request body, chunk framing included
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;
