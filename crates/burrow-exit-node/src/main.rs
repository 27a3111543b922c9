//! Burrow relay (exit node)
//!
//! Accepts public HTTP/HTTPS connections and relays each request through a
//! link to the tunnel client owning the requested host.

mod agent;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_control::BridgeRegistry;
use burrow_router::HostRegistry;
use burrow_server_http::{ErrorPage, HttpProxyServer, HttpServerConfig, SessionHandler};
use config::RelayConfig;

/// Reverse-tunnel relay - accepts public HTTP(S) traffic and routes it to tunnel clients
#[derive(Parser, Debug)]
#[command(name = "burrow-relay")]
#[command(about = "Run the HTTP/HTTPS ingress of a burrow relay", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// HTTP listener address (empty to disable)
    #[arg(long, env = "BURROW_HTTP_ADDR", default_value = "0.0.0.0:80")]
    http_addr: String,

    /// HTTPS listener address (disabled when not set)
    #[arg(long, env = "BURROW_HTTPS_ADDR")]
    https_addr: Option<String>,

    /// TLS certificate chain (PEM)
    #[arg(long, env = "BURROW_TLS_CERT", default_value = "conf/server.pem")]
    tls_cert: PathBuf,

    /// TLS private key (PEM)
    #[arg(long, env = "BURROW_TLS_KEY", default_value = "conf/server.key")]
    tls_key: PathBuf,

    /// HTML document served when a request cannot be routed
    #[arg(long, env = "BURROW_ERROR_PAGE")]
    error_page: Option<PathBuf>,

    /// YAML file describing clients and hosts
    #[arg(long, env = "BURROW_CONFIG", default_value = "conf/hosts.yaml")]
    config: PathBuf,

    /// Seconds between folding host traffic into client usage
    #[arg(long, default_value = "60")]
    flow_sync_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

fn parse_addr(value: Option<&str>) -> Result<Option<SocketAddr>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(addr) => addr
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid listen address: {}", addr)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Already installed is fine; listeners pick their provider explicitly
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("Starting burrow relay {} ({})", env!("GIT_TAG"), env!("GIT_HASH"));

    let relay_config = RelayConfig::load(&cli.config)?;
    let hosts = Arc::new(relay_config.build_registry()?);
    info!(
        "Loaded {} clients and {} hosts from {}",
        relay_config.clients.len(),
        hosts.host_count(),
        cli.config.display()
    );

    let bridge = Arc::new(BridgeRegistry::new());
    for client in relay_config.clients.iter().filter(|c| c.local_agent) {
        let events = bridge.register_agent(client.id, 64).await;
        tokio::spawn(agent::run_direct_agent(client.id, events));
    }

    let handler = Arc::new(SessionHandler::new(
        hosts.clone(),
        bridge.clone(),
        ErrorPage::load(cli.error_page.as_deref()),
    ));

    let server_config = HttpServerConfig {
        http_addr: parse_addr(Some(&cli.http_addr))?,
        https_addr: parse_addr(cli.https_addr.as_deref())?,
        cert_path: cli.tls_cert.clone(),
        key_path: cli.tls_key.clone(),
    };
    let listeners = HttpProxyServer::new(server_config, handler).bind().await?;
    if let Some(addr) = listeners.http_addr() {
        info!("HTTP endpoint: {}", addr);
    }
    if let Some(addr) = listeners.https_addr() {
        info!("HTTPS endpoint: {}", addr);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(sync_flow_periodically(
        hosts,
        Duration::from_secs(cli.flow_sync_interval.max(1)),
        shutdown.clone(),
    ));
    let server = tokio::spawn(listeners.serve(shutdown.clone()));

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping listeners...");
        }
        Err(err) => {
            error!("Error listening for shutdown signal: {}", err);
        }
    }

    shutdown.cancel();
    server.await??;
    info!("Relay stopped");

    Ok(())
}

async fn sync_flow_periodically(hosts: Arc<HostRegistry>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => hosts.sync_client_flow(),
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addr() {
        assert_eq!(parse_addr(None).unwrap(), None);
        assert_eq!(parse_addr(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_addr(Some("127.0.0.1:8080")).unwrap(),
            Some("127.0.0.1:8080".parse().unwrap())
        );
        assert!(parse_addr(Some("localhost")).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["burrow-relay", "--https-addr", "0.0.0.0:443"]);
        assert_eq!(cli.http_addr, "0.0.0.0:80");
        assert_eq!(cli.https_addr.as_deref(), Some("0.0.0.0:443"));
        assert_eq!(cli.flow_sync_interval, 60);
    }
}
