//! HTTP and HTTPS listeners feeding the session handler
use crate::session::SessionHandler;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("TLS {kind} file not found: {}", path.display())]
    MissingTlsFile { kind: &'static str, path: PathBuf },

    #[error("No listener configured")]
    NoListeners,

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Listener task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Plain HTTP listener, disabled when `None`
    pub http_addr: Option<SocketAddr>,
    /// TLS listener, disabled when `None`
    pub https_addr: Option<SocketAddr>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            http_addr: Some(SocketAddr::from(([0, 0, 0, 0], 80))),
            https_addr: None,
            cert_path: PathBuf::from("conf/server.pem"),
            key_path: PathBuf::from("conf/server.key"),
        }
    }
}

pub struct HttpProxyServer {
    config: HttpServerConfig,
    handler: Arc<SessionHandler>,
}

impl HttpProxyServer {
    pub fn new(config: HttpServerConfig, handler: Arc<SessionHandler>) -> Self {
        Self { config, handler }
    }

    /// Load certificate chain from PEM file
    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, HttpServerError> {
        let file = File::open(path)
            .map_err(|e| HttpServerError::TlsError(format!("Failed to open cert file: {}", e)))?;
        let mut reader = BufReader::new(file);

        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HttpServerError::TlsError(format!("Failed to parse certs: {}", e)))?;
        if certs.is_empty() {
            return Err(HttpServerError::TlsError(format!(
                "No certificate found in {}",
                path.display()
            )));
        }
        Ok(certs)
    }

    /// Load private key from PEM file
    fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, HttpServerError> {
        let file = File::open(path)
            .map_err(|e| HttpServerError::TlsError(format!("Failed to open key file: {}", e)))?;
        let mut reader = BufReader::new(file);

        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| HttpServerError::TlsError(format!("Failed to parse key: {}", e)))?
            .ok_or_else(|| HttpServerError::TlsError("No private key found".to_string()))
    }

    /// Build the TLS acceptor. Only HTTP/1.1 is offered over ALPN.
    pub fn tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, HttpServerError> {
        for (kind, path) in [("certificate", cert_path), ("key", key_path)] {
            if !path.is_file() {
                return Err(HttpServerError::MissingTlsFile {
                    kind,
                    path: path.to_path_buf(),
                });
            }
        }

        info!("Loading TLS certificate from: {}", cert_path.display());
        let certs = Self::load_certs(cert_path)?;

        info!("Loading TLS private key from: {}", key_path.display());
        let key = Self::load_private_key(key_path)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut tls_config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| HttpServerError::TlsError(format!("Invalid TLS versions: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| HttpServerError::TlsError(format!("Invalid cert/key: {}", e)))?;
        tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    async fn bind_addr(addr: SocketAddr) -> Result<TcpListener, HttpServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindError {
                address: addr.ip().to_string(),
                port: addr.port(),
                reason: e.to_string(),
            })
    }

    /// Validate TLS material and bind every configured listener.
    /// Nothing is accepted until [`BoundListeners::serve`] runs.
    pub async fn bind(&self) -> Result<BoundListeners, HttpServerError> {
        if self.config.http_addr.is_none() && self.config.https_addr.is_none() {
            return Err(HttpServerError::NoListeners);
        }

        let acceptor = match self.config.https_addr {
            Some(_) => Some(Self::tls_acceptor(
                &self.config.cert_path,
                &self.config.key_path,
            )?),
            None => None,
        };

        let plain = match self.config.http_addr {
            Some(addr) => Some(Self::bind_addr(addr).await?),
            None => None,
        };

        let secure = match (self.config.https_addr, acceptor) {
            (Some(addr), Some(acceptor)) => Some((Self::bind_addr(addr).await?, acceptor)),
            _ => None,
        };

        Ok(BoundListeners {
            plain,
            secure,
            handler: self.handler.clone(),
        })
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), HttpServerError> {
        self.bind().await?.serve(shutdown).await
    }
}

/// Listeners that are bound but not yet accepting
pub struct BoundListeners {
    plain: Option<TcpListener>,
    secure: Option<(TcpListener, TlsAcceptor)>,
    handler: Arc<SessionHandler>,
}

impl BoundListeners {
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.plain.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.secure.as_ref().and_then(|(l, _)| l.local_addr().ok())
    }

    /// Accept on every listener until `shutdown` is cancelled.
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), HttpServerError> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if let Some(listener) = self.plain {
            tasks.push(tokio::spawn(serve_plain(
                listener,
                self.handler.clone(),
                shutdown.clone(),
            )));
        }
        if let Some((listener, acceptor)) = self.secure {
            tasks.push(tokio::spawn(serve_tls(
                listener,
                acceptor,
                self.handler.clone(),
                shutdown.clone(),
            )));
        }

        for task in tasks {
            task.await
                .map_err(|e| HttpServerError::TaskFailed(e.to_string()))?;
        }
        Ok(())
    }
}

async fn serve_plain(listener: TcpListener, handler: Arc<SessionHandler>, shutdown: CancellationToken) {
    let local_addr = listener.local_addr().ok();
    info!("HTTP listener on {:?}", local_addr);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("HTTP listener on {:?} stopping", local_addr);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("Accepted HTTP connection from {}", peer_addr);
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle_connection(stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept HTTP connection: {}", e);
                }
            }
        }
    }
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<SessionHandler>,
    shutdown: CancellationToken,
) {
    let local_addr = listener.local_addr().ok();
    info!("HTTPS listener on {:?}", local_addr);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("HTTPS listener on {:?} stopping", local_addr);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let acceptor = acceptor.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                debug!("TLS handshake completed with {}", peer_addr);
                                handler.handle_connection(tls_stream, peer_addr).await;
                            }
                            Err(e) => debug!("TLS handshake failed with {}: {}", peer_addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept HTTPS connection: {}", e);
                }
            }
        }
    }
}
