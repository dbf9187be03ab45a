//! SOCKS4/4a and SOCKS5 CONNECT handshakes.
//!
//! Runs over an already-open socket to the proxy. On success the socket
//! carries raw bytes to the destination. Proxy authentication is not
//! offered: SOCKS5 advertises "no authentication" only and SOCKS4 sends
//! an empty user id.

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::request::ProxyKind;

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS4_GRANTED: u8 = 0x5A;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, thiserror::Error)]
pub enum SocksError {
    #[error("proxy I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected reply version {0:#04x}")]
    BadVersion(u8),
    #[error("proxy requires authentication")]
    AuthRequired,
    #[error("proxy rejected CONNECT: {0}")]
    Rejected(&'static str),
    #[error("destination host name longer than 255 bytes")]
    HostTooLong,
    #[error("SOCKS4 cannot address IPv6 destination {0}")]
    Ipv6Unsupported(IpAddr),
    #[error("malformed proxy reply (address type {0:#04x})")]
    BadAddressType(u8),
}

/// Ask the proxy on `stream` to CONNECT to `host:port`.
pub async fn handshake<S>(
    kind: ProxyKind,
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match kind {
        ProxyKind::Socks4 => socks4_connect(stream, host, port).await,
        ProxyKind::Socks5 => socks5_connect(stream, host, port).await,
    }
}

pub async fn socks5_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_NO_AUTH])
        .await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS5_VERSION {
        return Err(SocksError::BadVersion(choice[0]));
    }
    if choice[1] != SOCKS5_NO_AUTH {
        return Err(SocksError::AuthRequired);
    }

    let mut req = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            let len = u8::try_from(name.len()).map_err(|_| SocksError::HostTooLong)?;
            req.push(ATYP_DOMAIN);
            req.push(len);
            req.extend_from_slice(name);
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;
    stream.flush().await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(SocksError::BadVersion(head[0]));
    }
    if head[1] != 0x00 {
        return Err(SocksError::Rejected(socks5_reply_text(head[1])));
    }

    // Bound address is irrelevant for CONNECT but must be drained.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0])
        }
        other => return Err(SocksError::BadAddressType(other)),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

pub async fn socks4_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut req = vec![SOCKS4_VERSION, CMD_CONNECT];
    req.extend_from_slice(&port.to_be_bytes());
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.extend_from_slice(&ip.octets());
            req.push(0x00); // empty user id
        }
        Ok(ip @ IpAddr::V6(_)) => return Err(SocksError::Ipv6Unsupported(ip)),
        Err(_) => {
            // SOCKS4a: 0.0.0.x marks a trailing host name.
            req.extend_from_slice(&[0, 0, 0, 1]);
            req.push(0x00);
            if host.len() > 255 {
                return Err(SocksError::HostTooLong);
            }
            req.extend_from_slice(host.as_bytes());
            req.push(0x00);
        }
    }
    stream.write_all(&req).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x00 {
        return Err(SocksError::BadVersion(reply[0]));
    }
    match reply[1] {
        SOCKS4_GRANTED => Ok(()),
        0x5B => Err(SocksError::Rejected("request rejected or failed")),
        0x5C => Err(SocksError::Rejected("identd unreachable")),
        0x5D => Err(SocksError::Rejected("identd user mismatch")),
        _ => Err(SocksError::Rejected("unknown SOCKS4 status")),
    }
}

fn socks5_reply_text(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS5 status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the handshake against a scripted proxy. Each step reads the
    /// expected bytes, asserts them, then writes the canned reply.
    async fn scripted(
        kind: ProxyKind,
        host: &str,
        port: u16,
        steps: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<(), SocksError> {
        let (mut client, mut proxy) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            for (expect, reply) in steps {
                let mut got = vec![0u8; expect.len()];
                proxy.read_exact(&mut got).await.unwrap();
                assert_eq!(got, expect);
                proxy.write_all(&reply).await.unwrap();
            }
            proxy
        });
        let result = handshake(kind, &mut client, host, port).await;
        server.await.unwrap();
        result
    }

    const GREETING: [u8; 3] = [5, 1, 0];

    #[tokio::test]
    async fn socks5_domain_connect() {
        let mut connect = vec![5, 1, 0, 3, 15];
        connect.extend_from_slice(b"irc.example.org");
        connect.extend_from_slice(&6697u16.to_be_bytes());
        let steps = vec![
            (GREETING.to_vec(), vec![5, 0]),
            (connect, vec![5, 0, 0, 1, 10, 0, 0, 1, 0x1a, 0x29]),
        ];
        scripted(ProxyKind::Socks5, "irc.example.org", 6697, steps)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn socks5_ipv4_connect() {
        let steps = vec![
            (GREETING.to_vec(), vec![5, 0]),
            (
                vec![5, 1, 0, 1, 192, 0, 2, 7, 0x1a, 0x0b],
                vec![5, 0, 0, 3, 4, b'p', b'r', b'o', b'x', 0, 0],
            ),
        ];
        scripted(ProxyKind::Socks5, "192.0.2.7", 6667, steps)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn socks5_rejection_is_reported() {
        let mut connect = vec![5, 1, 0, 3, 4];
        connect.extend_from_slice(b"host");
        connect.extend_from_slice(&6667u16.to_be_bytes());
        let steps = vec![
            (GREETING.to_vec(), vec![5, 0]),
            (connect, vec![5, 5, 0, 1, 0, 0, 0, 0, 0, 0]),
        ];
        let err = scripted(ProxyKind::Socks5, "host", 6667, steps)
            .await
            .unwrap_err();
        assert!(matches!(err, SocksError::Rejected("connection refused")));
    }

    #[tokio::test]
    async fn socks5_auth_demand_is_refused() {
        let (mut client, mut proxy) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut greet = [0u8; 3];
            proxy.read_exact(&mut greet).await.unwrap();
            proxy.write_all(&[5, 0xFF]).await.unwrap();
        });
        let err = socks5_connect(&mut client, "host", 1).await.unwrap_err();
        assert!(matches!(err, SocksError::AuthRequired));
    }

    #[tokio::test]
    async fn socks4_ipv4_connect() {
        let expect = vec![4, 1, 0x1a, 0x0b, 10, 1, 2, 3, 0];
        let reply = vec![0, 0x5A, 0, 0, 0, 0, 0, 0];
        scripted(ProxyKind::Socks4, "10.1.2.3", 6667, vec![(expect, reply)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn socks4a_hostname_connect() {
        let mut expect = vec![4, 1, 0x1a, 0x29, 0, 0, 0, 1, 0];
        expect.extend_from_slice(b"irc.example.org");
        expect.push(0);
        let reply = vec![0, 0x5A, 0, 0, 0, 0, 0, 0];
        scripted(ProxyKind::Socks4, "irc.example.org", 6697, vec![(expect, reply)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn socks4_rejects_ipv6_destination() {
        let (mut client, _proxy) = tokio::io::duplex(64);
        let err = socks4_connect(&mut client, "::1", 6667).await.unwrap_err();
        assert!(matches!(err, SocksError::Ipv6Unsupported(_)));
    }

    #[tokio::test]
    async fn proxy_closing_early_is_io_error() {
        let (mut client, proxy) = tokio::io::duplex(64);
        drop(proxy);
        let err = socks5_connect(&mut client, "host", 1).await.unwrap_err();
        assert!(matches!(err, SocksError::Io(_)));
    }
}
