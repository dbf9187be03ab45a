//! jbIRC connection orchestrator
//!
//! Builds a layered transport (optional SOCKS tunnel, optional TLS), runs
//! one IRC session over it, normalizes protocol events for the
//! presentation layer and keeps an append-only audit log.
//!
//! # Modules
//!
//! - [`bridge`] - [`Orchestrator`] handle: commands in, events out
//! - [`session`] - session manager and state machine
//! - [`transport`] - proxy/TLS transport builder
//! - [`socks`] - SOCKS4/4a and SOCKS5 CONNECT handshakes
//! - [`tls`] - rustls client configuration
//! - [`client`] - IRC protocol client
//! - [`adapter`] - protocol events to chat events
//! - [`log`] - chat audit log writer
//! - [`irc`] - IRC line parsing/formatting

pub mod adapter;
pub mod bridge;
pub mod chat;
pub mod client;
pub mod desktop;
pub mod error;
pub mod event;
pub mod irc;
pub mod log;
pub mod request;
pub mod session;
pub mod socks;
pub mod tls;
pub mod transport;

pub use bridge::Orchestrator;
pub use chat::{ChatEvent, ChatKind, UiEvent};
pub use request::{ConnectionRequest, ProxyConfig, ProxyKind};
pub use session::{OrchestratorConfig, SessionInfo, SessionState};
