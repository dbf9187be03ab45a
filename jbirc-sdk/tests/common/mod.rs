//! Servers shared by the integration tests: a TLS acceptor with a
//! throwaway self-signed certificate and a relaying SOCKS5 proxy.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Server side TLS with a fresh self-signed cert for `localhost`.
pub fn tls_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Accept one SOCKS5 client on `listener`, grant CONNECT and return the
/// requested destination plus the socket, now acting as the tunnel.
pub async fn socks5_accept(listener: &TcpListener) -> (String, u16, TcpStream) {
    let (mut sock, _) = listener.accept().await.unwrap();

    let mut greeting = [0u8; 3];
    sock.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting, [0x05, 0x01, 0x00]);
    sock.write_all(&[0x05, 0x00]).await.unwrap();

    let mut head = [0u8; 4];
    sock.read_exact(&mut head).await.unwrap();
    assert_eq!(&head[..3], &[0x05, 0x01, 0x00]);
    let host = match head[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            sock.read_exact(&mut ip).await.unwrap();
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            sock.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; usize::from(len[0])];
            sock.read_exact(&mut name).await.unwrap();
            String::from_utf8(name).unwrap()
        }
        other => panic!("unexpected address type {other:#04x}"),
    };
    let mut port = [0u8; 2];
    sock.read_exact(&mut port).await.unwrap();

    sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    (host, u16::from_be_bytes(port), sock)
}

/// A SOCKS5 proxy for one connection that relays to `127.0.0.1:upstream`
/// whatever destination the client names. Reports that destination.
pub async fn socks5_relay(upstream: u16) -> (u16, oneshot::Receiver<(String, u16)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (host, dest_port, mut tunnel) = socks5_accept(&listener).await;
        let _ = seen_tx.send((host, dest_port));
        let mut server = TcpStream::connect(("127.0.0.1", upstream)).await.unwrap();
        let _ = tokio::io::copy_bidirectional(&mut tunnel, &mut server).await;
    });
    (port, seen_rx)
}
