//! Virtual host routing for the relay
//!
//! Holds tunnel clients and the hosts they own, and resolves an incoming
//! request's Host header (plus path, for location-scoped hosts) to a Host.
//! Supports wildcard domain patterns (e.g., `*.example.com`) with exact match priority.

pub mod client;
pub mod host;
pub mod registry;
pub mod wildcard;

pub use client::{Client, ClientConfig};
pub use host::{parse_header_rules, Host, HostConfig};
pub use registry::{HostRegistry, RouteError};
pub use wildcard::{extract_parent_wildcard, is_wildcard_pattern, validate_wildcard, WildcardError};

use burrow_proto::HttpRequest;
use std::sync::Arc;

/// Maps a request to the Host that serves it
///
/// Implementations must tolerate any number of concurrent callers.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str, request: &HttpRequest) -> Result<Arc<Host>, RouteError>;
}
