//! Error taxonomy for the orchestrator.
//!
//! Transport and session errors are fatal to the connect attempt that
//! raised them. [`LogWriteError`] never is.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::socks::SocksError;

/// A connection request failed validation.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("nickname is required")]
    EmptyNick,
    #[error("invalid nickname {0:?}")]
    InvalidNick(String),
    #[error("server is required")]
    EmptyServer,
    #[error("proxy host is required when the proxy is enabled")]
    EmptyProxyHost,
    #[error("port must be between 1 and 65535")]
    InvalidPort,
}

/// Failure while building the transport stream.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("proxy {addr} unreachable: {source}")]
    ProxyUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("proxy {addr} refused the tunnel: {source}")]
    ProxyHandshakeRejected {
        addr: String,
        #[source]
        source: SocksError,
    },
    #[error("TLS handshake with {server} failed: {reason}")]
    TlsHandshakeFailed { server: String, reason: String },
    #[error("TCP connect to {addr} failed: {source}")]
    DirectConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
}

/// Reasons a session ends in `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("server did not complete registration within {}s", .0.as_secs())]
    RegistrationTimeout(Duration),
    #[error("connection lost: {0}")]
    UnexpectedDisconnect(String),
}

/// Best-effort log write failure. Reported through `tracing` only.
#[derive(Debug, thiserror::Error)]
pub enum LogWriteError {
    #[error("no per-user data directory available")]
    NoLogDir,
    #[error("cannot create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("log queue full, entry dropped")]
    QueueFull,
}
