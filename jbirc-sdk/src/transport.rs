//! Transport builder: proxy tunnel, then optional TLS, then hand back one
//! bidirectional stream.
//!
//! The proxy settings are read exactly once, at the start of [`build`].
//! Nothing addressed to the IRC server is written until the SOCKS
//! handshake has succeeded, and a failed tunnel never proceeds to TLS.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::error::ConnectError;
use crate::request::ConnectionRequest;
use crate::socks;
use crate::tls::{self, CertPolicy};

/// Knobs for [`build`] that do not come from the connect form.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Upper bound for each stage: TCP connect, proxy handshake, TLS handshake.
    pub stage_timeout: Duration,
    pub cert_policy: CertPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(30),
            cert_policy: CertPolicy::AcceptAny,
        }
    }
}

/// Handshake stage reported while [`build`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TunnelPending,
    TlsHandshake,
}

/// The established byte stream. Callers treat both variants the same.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peer = match self {
            Transport::Plain(s) => s.peer_addr(),
            Transport::Tls(s) => s.get_ref().0.peer_addr(),
        };
        f.debug_struct("Transport")
            .field("tls", &self.is_tls())
            .field("peer", &peer.ok())
            .finish()
    }
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

/// Open the stream described by `request`.
///
/// `on_phase` is called as each handshake stage begins so the session
/// manager can track state while this future is pending.
pub async fn build(
    request: &ConnectionRequest,
    options: &TransportOptions,
    mut on_phase: impl FnMut(Phase),
) -> Result<Transport, ConnectError> {
    let proxy = request.proxy.clone();
    let limit = options.stage_timeout;

    let tcp = if proxy.enabled {
        on_phase(Phase::TunnelPending);
        let addr = proxy.addr();
        tracing::info!("[net] routing via {} proxy {addr}", proxy.kind);

        let connect = TcpStream::connect((proxy.host.as_str(), proxy.port));
        let mut tcp = within(limit, "proxy connect", connect)
            .await?
            .map_err(|source| ConnectError::ProxyUnreachable {
                addr: addr.clone(),
                source,
            })?;

        within(
            limit,
            "proxy handshake",
            socks::handshake(proxy.kind, &mut tcp, &request.server, request.port),
        )
        .await?
        .map_err(|source| ConnectError::ProxyHandshakeRejected { addr, source })?;

        tracing::info!("[net] proxy tunnel to {} established", request.server_addr());
        tcp
    } else {
        let addr = request.server_addr();
        let connect = TcpStream::connect((request.server.as_str(), request.port));
        let tcp = within(limit, "TCP connect", connect)
            .await?
            .map_err(|source| ConnectError::DirectConnectFailed { addr, source })?;
        tracing::info!("[net] TCP connected to {}", request.server_addr());
        tcp
    };
    let _ = tcp.set_nodelay(true);

    if !request.tls {
        return Ok(Transport::Plain(tcp));
    }

    on_phase(Phase::TlsHandshake);
    tracing::info!("[net] upgrading to TLS ({:?})", options.cert_policy);
    let tls_failed = |reason: String| ConnectError::TlsHandshakeFailed {
        server: request.server.clone(),
        reason,
    };
    let connector = tls::connector(options.cert_policy).map_err(|e| tls_failed(e.to_string()))?;
    let name = tls::server_name(&request.server).map_err(|e| tls_failed(e.to_string()))?;
    let stream = within(limit, "TLS handshake", connector.connect(name, tcp))
        .await?
        .map_err(|e| tls_failed(e.to_string()))?;
    tracing::info!("[net] TLS handshake complete");

    Ok(Transport::Tls(Box::new(stream)))
}

async fn within<F: Future>(
    after: Duration,
    stage: &'static str,
    fut: F,
) -> Result<F::Output, ConnectError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| ConnectError::Timeout { stage, after })
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
