//! Presentation-facing handle.
//!
//! Commands flow in through [`Orchestrator`] and are serialized by the
//! session manager. Events flow out on a broadcast channel: best effort,
//! at most once, and a subscriber only sees events sent after it
//! subscribed.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::chat::{ChatEvent, UiEvent};
use crate::log::LogWriter;
use crate::request::ConnectionRequest;
use crate::session::{OrchestratorConfig, Request, SessionInfo, SessionManager, SessionState};

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 32;

/// Outbound half of the bridge, shared by the session manager and the
/// per-session adapters.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<UiEvent>,
}

impl EventSink {
    pub fn new(tx: broadcast::Sender<UiEvent>) -> Self {
        Self { tx }
    }

    pub fn status(&self, text: impl Into<String>) {
        // No subscribers is fine.
        let _ = self.tx.send(UiEvent::StatusChanged(text.into()));
    }

    pub fn chat(&self, event: ChatEvent) {
        let _ = self.tx.send(UiEvent::Chat(event));
    }
}

/// Handle to a running orchestrator. Clones share the same session.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    commands: mpsc::Sender<Request>,
    events: broadcast::Sender<UiEvent>,
    state: watch::Receiver<SessionState>,
    info: watch::Receiver<Option<SessionInfo>>,
    log: LogWriter,
}

impl Orchestrator {
    /// Spawn the log writer and session manager on the current runtime.
    pub fn start(config: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let (info_tx, info) = watch::channel(None);
        let log = LogWriter::spawn(config.log_dir.clone());

        let sink = EventSink::new(events.clone());
        let manager = SessionManager::new(config, log.clone(), sink, state_tx, info_tx);
        tokio::spawn(manager.run(command_rx));

        Self {
            commands,
            events,
            state,
            info,
            log,
        }
    }

    /// Receive `StatusChanged` and chat events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Nick and joined channels of the live session, if any.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.info.borrow().clone()
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log.path()
    }

    /// Wait until queued log entries are on disk.
    pub async fn flush_log(&self) {
        self.log.flush().await;
    }

    /// Replace any current session with a new one for `request`.
    /// Returns once the connect has started; progress arrives as events.
    pub async fn connect(&self, request: ConnectionRequest) -> Result<()> {
        self.call(|done| Request::Connect {
            request: Box::new(request),
            done,
        })
        .await
    }

    /// Idempotent. Cancels an in-flight handshake too.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|done| Request::Disconnect { done }).await
    }

    /// Send a PRIVMSG. Silently ignored unless a session is active. No
    /// chat event is echoed back; the caller shows its own copy.
    pub async fn send(&self, target: &str, body: &str) -> Result<()> {
        self.call(|done| Request::Send {
            target: target.to_string(),
            body: body.to_string(),
            done,
        })
        .await
    }

    pub async fn open_logs(&self) -> Result<()> {
        self.call(|done| Request::OpenLogs { done }).await
    }

    /// Open an `http:`/`https:` link in the browser. Other schemes are ignored.
    pub async fn open_url(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.call(|done| Request::OpenUrl { url, done }).await
    }

    async fn call(&self, make: impl FnOnce(oneshot::Sender<()>) -> Request) -> Result<()> {
        let (done, processed) = oneshot::channel();
        self.commands
            .send(make(done))
            .await
            .map_err(|_| anyhow!("orchestrator has stopped"))?;
        processed
            .await
            .map_err(|_| anyhow!("orchestrator dropped the command"))
    }
}
