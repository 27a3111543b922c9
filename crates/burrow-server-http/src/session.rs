//! Per-connection relay state machine
//!
//! A session owns one edge connection. It resolves the host of every request,
//! opens a link towards the host's client when needed, and relays requests one
//! at a time: the next request is only read once the bridge acknowledged the
//! previous one. A request for a different host re-runs the policy checks and
//! opens a new link on the same edge connection.
//!
//! On termination the session either closes the last link with an
//! end-of-stream frame or, when no link was ever opened, answers with the
//! fallback page. Every link the session opened is then released locally so
//! the bridge side can drop its target connections. The edge connection is
//! always closed last.

use crate::edge::EdgeConnection;
use crate::error_page::ErrorPage;
use crate::rewrite::apply_rewrite;
use burrow_control::{Bridge, Tunnel};
use burrow_http_auth::{AuthResult, HttpAuthenticator};
use burrow_proto::{ConnType, HttpRequest, Link, LinkOptions, END_OF_STREAM};
use burrow_router::{Host, HostResolver};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No host serves the request
    HostNotFound,
    /// The client's traffic quota is used up
    FlowExceeded,
    /// The request failed the client's Basic auth
    Unauthorized,
    /// The client's bridge refused the link
    BridgeUnreachable,
    /// Writing a request into the tunnel failed
    TunnelWriteFailed,
    /// The edge connection ended or sent something unparseable
    EdgeClosed,
}

/// A link together with the tunnel carrying its frames
struct ActiveLink {
    link: Arc<Link>,
    tunnel: Arc<dyn Tunnel>,
}

enum State {
    /// The current host has no link yet. `previous` is the link of the host
    /// before a switch; it is only closed if no new link replaces it.
    LinkNeeded { previous: Option<ActiveLink> },
    Relaying(ActiveLink),
}

/// Shared dependencies of all sessions
pub struct SessionHandler {
    resolver: Arc<dyn HostResolver>,
    bridge: Arc<dyn Bridge>,
    error_page: ErrorPage,
}

impl SessionHandler {
    pub fn new(
        resolver: Arc<dyn HostResolver>,
        bridge: Arc<dyn Bridge>,
        error_page: ErrorPage,
    ) -> Self {
        Self {
            resolver,
            bridge,
            error_page,
        }
    }

    /// Serve a freshly accepted connection until it terminates.
    /// Returns `None` if the peer left before sending a complete request.
    pub async fn handle_connection<S>(&self, stream: S, peer_addr: SocketAddr) -> Option<Termination>
    where
        S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let mut edge = EdgeConnection::new(stream, peer_addr);
        match edge.read_request().await {
            Ok(Some(first)) => Some(self.process(edge, first).await),
            Ok(None) => {
                debug!("Connection from {} closed before a request", peer_addr);
                edge.close().await;
                None
            }
            Err(e) => {
                debug!("Failed to read first request from {}: {}", peer_addr, e);
                edge.close().await;
                None
            }
        }
    }

    /// Run the session for `edge`, starting with its already parsed first request
    pub async fn process(&self, mut edge: EdgeConnection, first: HttpRequest) -> Termination {
        let peer_addr = edge.peer_addr();
        let mut request = first;

        let mut host = match self.resolve(&request) {
            Some(host) => host,
            None => return self.finish(edge, None, Vec::new(), Termination::HostNotFound).await,
        };

        let mut opened: Vec<Arc<Link>> = Vec::new();
        let mut state = State::LinkNeeded { previous: None };
        let (termination, last_link) = loop {
            state = match state {
                State::LinkNeeded { previous } => {
                    match self.open_link(&host, &request, &edge).await {
                        // The superseded link gets no end-of-stream here so its
                        // response can still drain to the edge
                        Ok(active) => {
                            opened.push(active.link.clone());
                            State::Relaying(active)
                        }
                        Err(termination) => break (termination, previous),
                    }
                }
                State::Relaying(active) => {
                    if let Err(termination) = self.relay(&host, request, &edge, &active).await {
                        break (termination, Some(active));
                    }

                    request = match edge.read_request().await {
                        Ok(Some(next)) => next,
                        Ok(None) => break (Termination::EdgeClosed, Some(active)),
                        Err(e) => {
                            debug!("Stopped reading from {}: {}", peer_addr, e);
                            break (Termination::EdgeClosed, Some(active));
                        }
                    };

                    match self.resolve(&request) {
                        None => break (Termination::HostNotFound, Some(active)),
                        Some(next) if Arc::ptr_eq(&next, &host) => State::Relaying(active),
                        Some(next) => {
                            debug!(
                                "Session {} switching host {} -> {}",
                                peer_addr,
                                host.domain(),
                                next.domain()
                            );
                            host = next;
                            State::LinkNeeded {
                                previous: Some(active),
                            }
                        }
                    }
                }
            };
        };

        self.finish(edge, last_link, opened, termination).await
    }

    fn resolve(&self, request: &HttpRequest) -> Option<Arc<Host>> {
        match self.resolver.resolve(request.host(), request) {
            Ok(host) => Some(host),
            Err(e) => {
                info!("No route for {} {}: {}", request.host(), request.path(), e);
                None
            }
        }
    }

    /// Check the client's quota and auth, then announce a new link to its bridge
    async fn open_link(
        &self,
        host: &Arc<Host>,
        request: &HttpRequest,
        edge: &EdgeConnection,
    ) -> Result<ActiveLink, Termination> {
        let client = host.client();

        if client.flow().is_exhausted() {
            warn!(
                "Client {} exceeded its flow limit of {}MB, dropping {}",
                client.id(),
                client.flow().limit_mb(),
                edge.peer_addr()
            );
            return Err(Termination::FlowExceeded);
        }

        let authenticator =
            HttpAuthenticator::from_credentials(client.config().basic_credentials());
        if let AuthResult::Unauthorized(challenge) = authenticator.authenticate(&request.headers) {
            info!(
                "Rejected unauthenticated request from {} to {}",
                edge.peer_addr(),
                host.domain()
            );
            if let Err(e) = edge.write_all(&challenge).await {
                debug!("Failed to write auth challenge: {}", e);
            }
            return Err(Termination::Unauthorized);
        }

        let options = LinkOptions {
            client_id: client.id(),
            conn_type: ConnType::Tcp,
            target: host.random_target().to_string(),
            compress: client.config().compress,
            crypt: client.config().crypt,
            remote_addr: edge.peer_addr(),
        };
        let link = Arc::new(Link::new(
            options,
            edge.writer(),
            host.flow().clone(),
            client.rate().cloned(),
        ));

        let tunnel = self
            .bridge
            .send_link_info(client.id(), link.clone(), edge.peer_addr())
            .await
            .map_err(|e| {
                warn!("Failed to open link for {}: {}", host.domain(), e);
                Termination::BridgeUnreachable
            })?;

        link.run();
        info!(
            "Link {} opened: {} -> client {} ({})",
            link.id(),
            edge.peer_addr(),
            client.id(),
            link.target()
        );

        Ok(ActiveLink { link, tunnel })
    }

    /// Rewrite and forward one request, then wait for the bridge to take it
    async fn relay(
        &self,
        host: &Host,
        mut request: HttpRequest,
        edge: &EdgeConnection,
        active: &ActiveLink,
    ) -> Result<(), Termination> {
        apply_rewrite(&mut request, host, edge.peer_addr());
        let data = request.to_bytes();
        host.flow().add(data.len() as u64, 0);

        debug!(
            "Relaying {} {} ({} bytes) on link {}",
            request.method,
            request.target,
            data.len(),
            active.link.id()
        );

        if let Err(e) = active.tunnel.send_msg(data, &active.link).await {
            warn!("Tunnel write failed on link {}: {}", active.link.id(), e);
            return Err(Termination::TunnelWriteFailed);
        }

        if active.link.wait_ack().await.is_none() {
            return Err(Termination::TunnelWriteFailed);
        }
        Ok(())
    }

    async fn finish(
        &self,
        edge: EdgeConnection,
        last_link: Option<ActiveLink>,
        opened: Vec<Arc<Link>>,
        termination: Termination,
    ) -> Termination {
        match last_link {
            Some(active) => {
                if let Err(e) = active
                    .tunnel
                    .send_msg(Bytes::from_static(END_OF_STREAM), &active.link)
                    .await
                {
                    debug!("Failed to close link {}: {}", active.link.id(), e);
                }
            }
            // The 401 challenge already answered the request
            None if termination == Termination::Unauthorized => {}
            None => {
                if let Err(e) = edge.write_all(self.error_page.response()).await {
                    debug!("Failed to write error page to {}: {}", edge.peer_addr(), e);
                }
            }
        }

        for link in opened {
            link.close();
        }

        edge.close().await;
        debug!("Session {} ended: {:?}", edge.peer_addr(), termination);
        termination
    }
}
