//! Upstream WebSocket handshake.
//!
//! # Responsibilities
//! - Dial a fresh connection to the upstream (bounded connect)
//! - Wrap it in TLS when the target requires it
//! - Send a synthesized upgrade request carrying the caller's handshake headers
//! - Parse the upstream's response head and insist on `101`
//!
//! Nothing here touches the caller's connection, so every failure can still
//! be answered with an ordinary HTTP error.

use std::io;
use std::sync::Arc;

use axum::http::header::{
    self, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION,
};
use axum::http::{HeaderMap, HeaderName, Uri};
use bytes::{Bytes, BytesMut};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::net::target::{TargetScheme, UpstreamTarget};
use crate::net::{UpstreamLeg, UpstreamStream};
use crate::websocket::error::TunnelError;
use crate::websocket::TunnelSettings;

/// Largest upgrade response head accepted from the upstream.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;
const MAX_RESPONSE_HEADERS: usize = 64;

/// Values taken from the upstream's `101` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeResult {
    pub accept: Option<String>,
    pub protocol: Option<String>,
}

/// A completed upstream handshake.
#[derive(Debug)]
pub struct UpstreamHandshake {
    pub leg: UpstreamLeg,
    pub result: HandshakeResult,
}

/// Open a connection to the upstream and perform the WebSocket upgrade on it.
pub async fn initiate(
    target: &UpstreamTarget,
    settings: &TunnelSettings,
    tls: &Arc<ClientConfig>,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<UpstreamHandshake, TunnelError> {
    let addr = target.dial_address();
    let tcp = match tokio::time::timeout(
        settings.connect_timeout,
        TcpStream::connect((target.host(), target.port())),
    )
    .await
    {
        Ok(Ok(tcp)) => tcp,
        Ok(Err(source)) => return Err(TunnelError::UpstreamUnreachable { addr, source }),
        Err(_) => {
            return Err(TunnelError::UpstreamUnreachable {
                addr,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!(upstream = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let upgrade_request = build_upgrade_request(target, uri, headers);

    tokio::time::timeout(settings.handshake_timeout, async {
        let mut stream = match target.scheme() {
            TargetScheme::Plain => UpstreamStream::Plain(tcp),
            TargetScheme::Tls => UpstreamStream::Tls(Box::new(secure(target, tls, tcp).await?)),
        };

        let (result, pending) = exchange(&mut stream, &upgrade_request).await?;
        Ok::<_, TunnelError>(UpstreamHandshake {
            leg: UpstreamLeg::new(stream, pending),
            result,
        })
    })
    .await
    .map_err(|_| TunnelError::UpstreamHandshakeTimeout)?
}

async fn secure(
    target: &UpstreamTarget,
    tls: &Arc<ClientConfig>,
    tcp: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TunnelError> {
    let server_name = ServerName::try_from(target.host().to_string()).map_err(|e| {
        TunnelError::UpstreamTlsFailure(io::Error::new(io::ErrorKind::InvalidInput, e))
    })?;

    TlsConnector::from(Arc::clone(tls))
        .connect(server_name, tcp)
        .await
        .map_err(TunnelError::UpstreamTlsFailure)
}

/// Write the upgrade request and read the response head.
///
/// Returns the handshake values and any bytes received after the head.
async fn exchange<S>(stream: &mut S, request: &[u8]) -> Result<(HandshakeResult, Bytes), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(request)
        .await
        .map_err(TunnelError::UpstreamWriteFailure)?;
    stream
        .flush()
        .await
        .map_err(TunnelError::UpstreamWriteFailure)?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some((status, result, head_len)) = parse_response_head(&buf)? {
            if status != 101 {
                return Err(TunnelError::UpstreamHandshakeRejected { status });
            }
            let pending = buf.split_off(head_len).freeze();
            return Ok((result, pending));
        }

        if buf.len() >= MAX_RESPONSE_HEAD {
            return Err(TunnelError::UpstreamHandshakeInvalid(
                "response head too large".to_string(),
            ));
        }

        let n = stream
            .read_buf(&mut buf)
            .await
            .map_err(|e| TunnelError::UpstreamHandshakeInvalid(e.to_string()))?;
        if n == 0 {
            return Err(TunnelError::UpstreamHandshakeInvalid(
                "connection closed before response head".to_string(),
            ));
        }
    }
}

/// Parse a response head. `Ok(None)` means more bytes are needed.
fn parse_response_head(buf: &[u8]) -> Result<Option<(u16, HandshakeResult, usize)>, TunnelError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let head_len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(TunnelError::UpstreamHandshakeInvalid(e.to_string())),
    };

    let status = response.code.unwrap_or_default();
    let find = |name: &HeaderName| {
        response
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_str()))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let result = HandshakeResult {
        accept: find(&SEC_WEBSOCKET_ACCEPT),
        protocol: find(&SEC_WEBSOCKET_PROTOCOL),
    };
    Ok(Some((status, result, head_len)))
}

/// Serialize the upgrade request sent to the upstream.
///
/// Version and key are always sent; protocol, extensions and authorization
/// only when the caller supplied them.
pub fn build_upgrade_request(target: &UpstreamTarget, uri: &Uri, headers: &HeaderMap) -> Vec<u8> {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");

    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(format!("GET {path} HTTP/1.1\r\n").as_bytes());
    push_header(&mut out, "Host", target.authority().as_str().as_bytes());
    push_header(&mut out, "Connection", b"Upgrade");
    push_header(&mut out, "Upgrade", b"websocket");

    push_header(&mut out, "Sec-WebSocket-Version", value(headers, &SEC_WEBSOCKET_VERSION));
    push_header(&mut out, "Sec-WebSocket-Key", value(headers, &SEC_WEBSOCKET_KEY));

    let optional = [
        ("Sec-WebSocket-Protocol", SEC_WEBSOCKET_PROTOCOL),
        ("Sec-WebSocket-Extensions", SEC_WEBSOCKET_EXTENSIONS),
        ("Authorization", header::AUTHORIZATION),
    ];
    for (name, key) in optional {
        let v = value(headers, &key);
        if !v.is_empty() {
            push_header(&mut out, name, v);
        }
    }

    out.extend_from_slice(b"\r\n");
    out
}

fn value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a [u8] {
    headers.get(name).map(|v| v.as_bytes()).unwrap_or_default()
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::request::Parts;
    use axum::http::Request;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn settings() -> TunnelSettings {
        TunnelSettings {
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            close_deadline: Duration::from_secs(2),
        }
    }

    /// Accept one connection, read the request head, answer with `response`.
    async fn mock_upstream(response: &'static [u8]) -> (UpstreamTarget, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(response).await.unwrap();
            received
        });
        let target = UpstreamTarget::parse(&format!("http://{addr}")).unwrap();
        (target, handle)
    }

    #[test]
    fn upgrade_request_forwards_only_present_optionals() {
        let target = UpstreamTarget::parse("http://backend.local:8080").unwrap();
        let request = parts(
            "/chat?room=1",
            &[
                ("sec-websocket-version", "13"),
                ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
                ("sec-websocket-protocol", "chat, superchat"),
                ("cookie", "session=1"),
            ],
        );

        let text = String::from_utf8(build_upgrade_request(&target, &request.uri, &request.headers)).unwrap();
        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: backend.local:8080\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
        assert!(!text.contains("Sec-WebSocket-Extensions"));
        assert!(!text.contains("Authorization"));
        assert!(!text.contains("cookie"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_accept_and_protocol() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
            sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            Sec-WebSocket-Protocol: chat\r\n\r\nextra";
        let (status, result, len) = parse_response_head(head).unwrap().unwrap();
        assert_eq!(status, 101);
        assert_eq!(result.accept.as_deref(), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert_eq!(result.protocol.as_deref(), Some("chat"));
        assert_eq!(&head[len..], b"extra");
    }

    #[test]
    fn partial_head_needs_more_bytes() {
        assert!(parse_response_head(b"HTTP/1.1 101 Switching").unwrap().is_none());
    }

    #[tokio::test]
    async fn successful_handshake_keeps_trailing_bytes() {
        let (target, upstream) = mock_upstream(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Accept: abc=\r\n\r\n\x81\x02hi",
        )
        .await;
        let tls = crate::net::tls::client_config(false).unwrap();
        let request = parts("/ws", &[("sec-websocket-key", "k"), ("sec-websocket-version", "13")]);

        let handshake = initiate(&target, &settings(), &tls, &request.uri, &request.headers).await.unwrap();
        assert_eq!(handshake.result.accept.as_deref(), Some("abc="));
        assert_eq!(handshake.result.protocol, None);

        let received = String::from_utf8(upstream.await.unwrap()).unwrap();
        assert!(received.starts_with("GET /ws HTTP/1.1\r\n"));

        // The frame may arrive in the same read as the head or later.
        let mut leg = handshake.leg;
        let mut frame = [0u8; 4];
        leg.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"\x81\x02hi");
    }

    #[tokio::test]
    async fn non_101_is_rejected_with_status() {
        let (target, _upstream) =
            mock_upstream(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;
        let tls = crate::net::tls::client_config(false).unwrap();

        let err = initiate(&target, &settings(), &tls, &Uri::from_static("/"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::UpstreamHandshakeRejected { status: 404 }));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = UpstreamTarget::parse(&format!("http://{addr}")).unwrap();
        let tls = crate::net::tls::client_config(false).unwrap();
        let err = initiate(&target, &settings(), &tls, &Uri::from_static("/"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::UpstreamUnreachable { .. }));
    }

    #[tokio::test]
    async fn early_close_is_invalid_handshake() {
        let (target, _upstream) = mock_upstream(b"HTTP/1.1 101 Swi").await;
        let tls = crate::net::tls::client_config(false).unwrap();

        let err = initiate(&target, &settings(), &tls, &Uri::from_static("/"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::UpstreamHandshakeInvalid(_)));
    }

    #[tokio::test]
    async fn connect_timeout_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = UpstreamTarget::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let tls = crate::net::tls::client_config(false).unwrap();
        let settings = TunnelSettings {
            connect_timeout: Duration::ZERO,
            ..settings()
        };

        let err = initiate(&target, &settings, &tls, &Uri::from_static("/"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, TunnelError::UpstreamUnreachable { source, .. } if source.kind() == io::ErrorKind::TimedOut),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn plain_answer_to_client_hello_is_tls_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut hello = [0u8; 1024];
            let _ = socket.read(&mut hello).await;
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let target = UpstreamTarget::parse(&format!("https://{addr}")).unwrap();
        let tls = crate::net::tls::client_config(true).unwrap();
        let err = initiate(&target, &settings(), &tls, &Uri::from_static("/"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::UpstreamTlsFailure(_)), "got: {err}");
    }
}
