use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use jbirc_sdk::desktop::SystemOpener;
use jbirc_sdk::log::default_log_dir;
use jbirc_sdk::request::{ConnectionRequest, ProxyConfig, ProxyKind, DEFAULT_CLIENT_TAG};
use jbirc_sdk::tls::CertPolicy;
use jbirc_sdk::transport::TransportOptions;
use jbirc_sdk::OrchestratorConfig;

/// Line-mode IRC client on top of the jbIRC connection orchestrator.
#[derive(Parser, Debug, Clone)]
#[command(name = "jbirc", version, about)]
pub struct Cli {
    /// IRC server host name.
    pub server: String,

    /// IRC nickname.
    pub nick: String,

    /// Server port.
    #[arg(long, default_value_t = 6697)]
    pub port: u16,

    /// Channel to join after registration. Repeat for more; joined in order.
    #[arg(long = "channel", short = 'c')]
    pub channels: Vec<String>,

    /// Connect without TLS.
    #[arg(long)]
    pub no_tls: bool,

    /// Verify the server certificate against the web PKI roots.
    /// Without this any certificate is accepted.
    #[arg(long)]
    pub tls_verify: bool,

    /// Tunnel through a SOCKS proxy of this type.
    #[arg(long, value_enum)]
    pub proxy_type: Option<ProxyArg>,

    /// SOCKS proxy host.
    #[arg(long, default_value = "127.0.0.1")]
    pub proxy_host: String,

    /// SOCKS proxy port.
    #[arg(long, default_value_t = 9050)]
    pub proxy_port: u16,

    /// Realname and CTCP VERSION reply.
    #[arg(long, default_value = DEFAULT_CLIENT_TAG)]
    pub client_tag: String,

    /// Directory for chat_history.txt (default: per-user data dir).
    #[arg(long, env = "JBIRC_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Do not write the chat audit log.
    #[arg(long)]
    pub no_log: bool,

    /// Limit for each connect stage (proxy, TCP, TLS) in seconds.
    #[arg(long, default_value_t = 30)]
    pub stage_timeout_secs: u64,

    /// How long the server may take to welcome us, in seconds.
    #[arg(long, default_value_t = 60)]
    pub registration_timeout_secs: u64,

    /// Print events as JSON lines instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProxyArg {
    Socks4,
    Socks5,
}

impl From<ProxyArg> for ProxyKind {
    fn from(arg: ProxyArg) -> Self {
        match arg {
            ProxyArg::Socks4 => ProxyKind::Socks4,
            ProxyArg::Socks5 => ProxyKind::Socks5,
        }
    }
}

impl Cli {
    pub fn request(&self) -> ConnectionRequest {
        let mut req = ConnectionRequest::new(&self.nick, &self.server);
        req.port = self.port;
        req.channels = self.channels.clone();
        req.tls = !self.no_tls;
        req.client_tag = self.client_tag.clone();
        if let Some(kind) = self.proxy_type {
            req.proxy = ProxyConfig {
                enabled: true,
                kind: kind.into(),
                host: self.proxy_host.clone(),
                port: self.proxy_port,
            };
        }
        req
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let log_dir = if self.no_log {
            None
        } else {
            self.log_dir.clone().or_else(default_log_dir)
        };
        OrchestratorConfig {
            log_dir,
            transport: TransportOptions {
                stage_timeout: Duration::from_secs(self.stage_timeout_secs),
                cert_policy: if self.tls_verify {
                    CertPolicy::Verify
                } else {
                    CertPolicy::AcceptAny
                },
            },
            registration_timeout: Duration::from_secs(self.registration_timeout_secs),
            opener: Arc::new(SystemOpener),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_connect_form() {
        let cli = Cli::parse_from(["jbirc", "irc.libera.chat", "neo"]);
        let req = cli.request();
        assert_eq!(req.port, 6697);
        assert!(req.tls);
        assert!(!req.proxy.enabled);
        assert_eq!(req.client_tag, "jbIRC");

        let config = cli.orchestrator_config();
        assert_eq!(config.transport.cert_policy, CertPolicy::AcceptAny);
        assert_eq!(config.registration_timeout, Duration::from_secs(60));
    }

    #[test]
    fn proxy_and_channels_are_carried_over() {
        let cli = Cli::parse_from([
            "jbirc", "irc.example.org", "neo", "--no-tls", "--port", "6667",
            "-c", "#a", "-c", "#b", "--proxy-type", "socks4", "--proxy-port", "1080",
        ]);
        let req = cli.request();
        assert!(!req.tls);
        assert_eq!(req.channels, vec!["#a", "#b"]);
        assert!(req.proxy.enabled);
        assert_eq!(req.proxy.kind, ProxyKind::Socks4);
        assert_eq!(req.proxy.addr(), "127.0.0.1:1080");
    }

    #[test]
    fn no_log_disables_the_audit_log() {
        let cli = Cli::parse_from(["jbirc", "irc.example.org", "neo", "--no-log"]);
        assert!(cli.orchestrator_config().log_dir.is_none());
    }

    #[test]
    fn explicit_log_dir_wins() {
        let cli = Cli::parse_from(["jbirc", "irc.example.org", "neo", "--log-dir", "/tmp/jb"]);
        assert_eq!(cli.orchestrator_config().log_dir, Some(PathBuf::from("/tmp/jb")));
    }
}
