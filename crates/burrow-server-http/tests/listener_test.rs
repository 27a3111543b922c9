//! End-to-end tests over real sockets: plain and TLS listeners, shutdown

use burrow_control::{BridgeEvent, BridgeRegistry};
use burrow_router::{Client, ClientConfig, Host, HostConfig, HostRegistry};
use burrow_server_http::{ErrorPage, HttpProxyServer, HttpServerConfig, HttpServerError, SessionHandler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_util::sync::CancellationToken;

const BACKEND_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

struct TestRelay {
    bridge: Arc<BridgeRegistry>,
    handler: Arc<SessionHandler>,
}

fn test_relay() -> TestRelay {
    let hosts = Arc::new(HostRegistry::new());
    let client = hosts
        .register_client(Client::new(7, ClientConfig::default()))
        .unwrap();
    let host = Host::new(
        HostConfig {
            domain: "app.example.com".to_string(),
            targets: vec!["127.0.0.1:3000".to_string()],
            ..Default::default()
        },
        client,
    )
    .unwrap();
    hosts.register_host(host).unwrap();

    let bridge = Arc::new(BridgeRegistry::new());
    let handler = Arc::new(SessionHandler::new(
        hosts,
        bridge.clone(),
        ErrorPage::new("no such host"),
    ));
    TestRelay { bridge, handler }
}

/// Agent for client 7 answering every request with `BACKEND_RESPONSE`
async fn spawn_backend_agent(bridge: &BridgeRegistry) {
    let mut events = bridge.register_agent(7, 16).await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event.is_end_of_stream() {
                continue;
            }
            if let BridgeEvent::Frame { link, .. } = event {
                let _ = link.write_to_edge(BACKEND_RESPONSE).await;
                link.ack().await;
            }
        }
    });
}

async fn exchange<S>(mut stream: S, request: &[u8]) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("relay did not close the connection")
        .unwrap();
    String::from_utf8(response).unwrap()
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("burrow-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn test_plain_listener_relays_requests() {
    let relay = test_relay();
    spawn_backend_agent(&relay.bridge).await;

    let config = HttpServerConfig {
        http_addr: Some("127.0.0.1:0".parse().unwrap()),
        https_addr: None,
        ..Default::default()
    };
    let listeners = HttpProxyServer::new(config, relay.handler.clone())
        .bind()
        .await
        .unwrap();
    let addr = listeners.http_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(listeners.serve(shutdown.clone()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let response = exchange(
        stream,
        b"GET /a HTTP/1.1\r\nHost: app.example.com\r\n\r\nGET /b HTTP/1.1\r\nHost: app.example.com\r\n\r\n",
    )
    .await;
    assert_eq!(response.matches("hello").count(), 2);

    let stream = TcpStream::connect(addr).await.unwrap();
    let response = exchange(stream, b"GET / HTTP/1.1\r\nHost: other.example.com\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"));
    assert!(response.ends_with("no such host"));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tls_listener_negotiates_http11_only() {
    let relay = test_relay();
    spawn_backend_agent(&relay.bridge).await;

    let dir = temp_dir("tls");
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join("server.pem");
    let key_path = dir.join("server.key");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    let config = HttpServerConfig {
        http_addr: None,
        https_addr: Some("127.0.0.1:0".parse().unwrap()),
        cert_path,
        key_path,
    };
    let listeners = HttpProxyServer::new(config, relay.handler.clone())
        .bind()
        .await
        .unwrap();
    assert!(listeners.http_addr().is_none());
    let addr = listeners.https_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(listeners.serve(shutdown.clone()));

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let mut client_config =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
    client_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let tls = connector.connect(server_name, tcp).await.unwrap();
    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));

    let response = exchange(tls, b"GET / HTTP/1.1\r\nHost: app.example.com\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("hello"));

    shutdown.cancel();
    server.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_missing_certificate_fails_before_accepting() {
    let relay = test_relay();
    let dir = temp_dir("missing-cert");

    let config = HttpServerConfig {
        http_addr: Some("127.0.0.1:0".parse().unwrap()),
        https_addr: Some("127.0.0.1:0".parse().unwrap()),
        cert_path: dir.join("absent.pem"),
        key_path: dir.join("absent.key"),
    };
    let result = HttpProxyServer::new(config, relay.handler.clone()).bind().await;

    assert!(matches!(
        result,
        Err(HttpServerError::MissingTlsFile { kind: "certificate", .. })
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_no_listener_configured() {
    let relay = test_relay();
    let config = HttpServerConfig {
        http_addr: None,
        https_addr: None,
        ..Default::default()
    };
    let result = HttpProxyServer::new(config, relay.handler.clone()).bind().await;
    assert!(matches!(result, Err(HttpServerError::NoListeners)));
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let relay = test_relay();
    let config = HttpServerConfig {
        http_addr: Some("127.0.0.1:0".parse().unwrap()),
        https_addr: None,
        ..Default::default()
    };
    let listeners = HttpProxyServer::new(config, relay.handler.clone())
        .bind()
        .await
        .unwrap();
    let addr = listeners.http_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(listeners.serve(shutdown.clone()));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("listeners did not stop")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}
