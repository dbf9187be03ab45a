//! Connection request submitted by the presentation layer.
//!
//! Field names follow the JSON payload the connect form sends, so a
//! request can be deserialized straight from the UI.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Client tag used as realname when the form leaves it empty.
pub const DEFAULT_CLIENT_TAG: &str = "jbIRC";

/// Everything needed to open one IRC session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub nick: String,
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Joined in this order once registration completes.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Sent as the IRC realname and in CTCP VERSION replies.
    #[serde(default = "default_client_tag", rename = "client")]
    pub client_tag: String,
}

fn default_port() -> u16 {
    6697
}

fn default_client_tag() -> String {
    DEFAULT_CLIENT_TAG.to_string()
}

impl ConnectionRequest {
    /// A request with form defaults: TLS on 6697, no channels, proxy off.
    pub fn new(nick: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            server: server.into(),
            port: default_port(),
            channels: Vec::new(),
            tls: true,
            proxy: ProxyConfig::default(),
            client_tag: default_client_tag(),
        }
    }

    /// Reject requests the session manager cannot act on.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.nick.trim().is_empty() {
            return Err(RequestError::EmptyNick);
        }
        if self.nick.contains([' ', '\r', '\n']) {
            return Err(RequestError::InvalidNick(self.nick.clone()));
        }
        if self.server.trim().is_empty() {
            return Err(RequestError::EmptyServer);
        }
        if self.port == 0 {
            return Err(RequestError::InvalidPort);
        }
        if self.proxy.enabled {
            if self.proxy.host.trim().is_empty() {
                return Err(RequestError::EmptyProxyHost);
            }
            if self.proxy.port == 0 {
                return Err(RequestError::InvalidPort);
            }
        }
        Ok(())
    }

    /// Channel names with blanks dropped, in request order.
    pub fn channel_list(&self) -> Vec<String> {
        self.channels
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `host:port` of the IRC server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// SOCKS protocol version spoken to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyKind {
    #[serde(rename = "SOCKS4")]
    Socks4,
    #[serde(rename = "SOCKS5")]
    Socks5,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Socks4 => f.write_str("SOCKS4"),
            ProxyKind::Socks5 => f.write_str("SOCKS5"),
        }
    }
}

/// Optional SOCKS tunnel. Read once when the transport is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
}

impl Default for ProxyConfig {
    /// The local Tor preset, disabled.
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ProxyKind::Socks5,
            host: "127.0.0.1".to_string(),
            port: 9050,
        }
    }
}

impl ProxyConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
