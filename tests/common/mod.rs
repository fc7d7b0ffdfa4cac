//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use ws_gateway::config::ProxyConfig;
use ws_gateway::http::HttpServer;
use ws_gateway::lifecycle::Shutdown;
use ws_gateway::net::TunnelTracker;

/// A gateway running on an ephemeral port.
pub struct Gateway {
    pub addr: SocketAddr,
    pub tracker: TunnelTracker,
    pub shutdown: Shutdown,
}

/// Start a gateway in front of `upstream` after letting `tweak` adjust the config.
pub async fn spawn_gateway<F>(upstream: &str, tweak: F) -> Gateway
where
    F: FnOnce(&mut ProxyConfig),
{
    let mut config = ProxyConfig::default();
    config.upstream.url = upstream.to_string();
    config.upstream.connect_timeout_secs = 2;
    config.upstream.handshake_timeout_secs = 2;
    config.websocket.close_deadline_secs = 1;
    tweak(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config).unwrap();
    let tracker = server.tracker();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });

    Gateway {
        addr,
        tracker,
        shutdown,
    }
}

/// Read from `socket` until a full HTTP head has arrived. Returns the head
/// and whatever followed it.
pub async fn read_head<S: AsyncRead + Unpin>(socket: &mut S) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(pos + 4);
            return (String::from_utf8_lossy(&buf).into_owned(), rest);
        }
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return (String::from_utf8_lossy(&buf).into_owned(), Vec::new());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_head| async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. `f` receives the request head.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = std::sync::Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let (head, _) = read_head(&mut socket).await;
                let (status, body) = f(head).await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// What a raw upstream saw on one connection.
#[derive(Debug)]
pub struct UpstreamSession {
    /// The upgrade request head as received.
    pub head: String,
    /// Every byte received after the head, up to EOF.
    pub received: Vec<u8>,
}

/// Start an upstream that answers the first connection's upgrade with
/// `response`, then writes `after` and records everything it receives until
/// the gateway closes the connection.
pub async fn start_raw_upstream(
    response: String,
    after: &'static [u8],
) -> (SocketAddr, oneshot::Receiver<UpstreamSession>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let _ = tx.send(serve_upgrade(socket, response, after).await);
    });

    (addr, rx)
}

/// Like [`start_raw_upstream`], behind TLS with a self-signed certificate.
pub async fn start_tls_upstream(
    response: String,
    after: &'static [u8],
) -> (SocketAddr, oneshot::Receiver<UpstreamSession>) {
    let acceptor = self_signed_acceptor();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let socket = acceptor.accept(socket).await.unwrap();
        let _ = tx.send(serve_upgrade(socket, response, after).await);
    });

    (addr, rx)
}

async fn serve_upgrade<S>(mut socket: S, response: String, after: &'static [u8]) -> UpstreamSession
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, mut received) = read_head(&mut socket).await;
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.write_all(after).await.unwrap();

    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&chunk[..n]),
        }
    }
    let _ = socket.shutdown().await;
    UpstreamSession { head, received }
}

fn self_signed_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = CertificateDer::from(certified.cert.der().to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// `101` answer carrying `accept` and an optional sub-protocol.
pub fn switching_protocols(accept: Option<&str>, protocol: Option<&str>) -> String {
    let mut response = String::from(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
    );
    if let Some(accept) = accept {
        response.push_str(&format!("Sec-WebSocket-Accept: {accept}\r\n"));
    }
    if let Some(protocol) = protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    response.push_str("\r\n");
    response
}

/// Raw upgrade request for `path` with the RFC 6455 sample key.
pub fn upgrade_request(path: &str, extra: &[(&str, &str)]) -> String {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\nHost: gateway.test\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"
    );
    for (name, value) in extra {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Wait for all tunnels of `tracker` to close.
pub async fn drained(tracker: &TunnelTracker) {
    tokio::time::timeout(Duration::from_secs(5), tracker.wait_for_drain())
        .await
        .expect("tunnels should drain");
}

/// Read the rest of a `Content-Length` framed body announced in `head`.
pub async fn read_body(socket: &mut TcpStream, head: &str, mut body: Vec<u8>) -> String {
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while body.len() < length {
        let mut chunk = [0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut chunk))
            .await
            .expect("body in time")
            .unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&body).into_owned()
}
