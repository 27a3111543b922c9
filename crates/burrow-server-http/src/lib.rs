//! Public HTTP/HTTPS ingress of the relay
//!
//! Accepts edge connections, parses pipelined HTTP/1.x requests and hands each
//! connection to a [`SessionHandler`], which relays the requests through links
//! to the owning client's bridge.

pub mod edge;
pub mod error_page;
pub mod rewrite;
pub mod server;
pub mod session;

pub use edge::{EdgeConnection, EdgeError};
pub use error_page::ErrorPage;
pub use server::{BoundListeners, HttpProxyServer, HttpServerConfig, HttpServerError};
pub use session::{SessionHandler, Termination};
