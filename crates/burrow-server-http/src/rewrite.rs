//! Request rewriting applied before a request enters the tunnel

use burrow_proto::HttpRequest;
use burrow_router::Host;
use std::net::SocketAddr;

/// Apply the host's Host override and header rules, then stamp the client address
pub fn apply_rewrite(request: &mut HttpRequest, host: &Host, remote_addr: SocketAddr) {
    if let Some(new_host) = host.host_change() {
        request.set_host(new_host);
    }

    for (name, value) in host.header_change() {
        request.set_header(name, value);
    }

    let client_ip = remote_addr.ip().to_string();
    request.set_header("X-Forwarded-For", &client_ip);
    request.set_header("X-Real-IP", &client_ip);
}
