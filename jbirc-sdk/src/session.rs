//! Session manager.
//!
//! A single actor task owns the (at most one) session. Presentation
//! commands arrive on one channel and are handled one at a time. Transport
//! construction runs in a separate task so a `Disconnect` can cancel it;
//! its result comes back tagged with the session id it was started for,
//! and results for any other id are discarded.
//!
//! ```text
//! Idle -> TunnelPending? -> TlsHandshake? -> Registering -> Active -> Closing -> Idle
//!           \________________\________________\______________\-> Failed -> Idle
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapter::{EventAdapter, Outcome, Subscription};
use crate::bridge::EventSink;
use crate::client::{Client, ClientConfig};
use crate::desktop::{self, Opener, SystemOpener};
use crate::error::{ConnectError, SessionError};
use crate::event::Event;
use crate::log::{LogKind, LogWriter};
use crate::request::ConnectionRequest;
use crate::transport::{self, Phase, Transport, TransportOptions};

/// Process-unique session identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TunnelPending,
    TlsHandshake,
    Registering,
    Active,
    Closing,
    Failed,
}

impl SessionState {
    fn stage(self) -> Option<u8> {
        match self {
            SessionState::Idle => Some(0),
            SessionState::TunnelPending => Some(1),
            SessionState::TlsHandshake => Some(2),
            SessionState::Registering => Some(3),
            SessionState::Active => Some(4),
            SessionState::Closing | SessionState::Failed => None,
        }
    }

    /// States with a connect attempt or live connection behind them.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            SessionState::TunnelPending
                | SessionState::TlsHandshake
                | SessionState::Registering
                | SessionState::Active
        )
    }

    /// Forward along the connect path, sideways into `Failed` or
    /// `Closing`, and back to `Idle` only from `Closing` or `Failed`.
    pub fn can_transition(self, to: SessionState) -> bool {
        match to {
            SessionState::Idle => matches!(self, SessionState::Closing | SessionState::Failed),
            SessionState::Failed => self == SessionState::Idle || self.is_in_progress(),
            SessionState::Closing => self.is_in_progress(),
            _ => match (self.stage(), to.stage()) {
                (Some(from), Some(next)) => next > from,
                _ => false,
            },
        }
    }
}

/// What presentation layers may see of the live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Requested nick until registration, then the one the server confirmed.
    pub nick: String,
    /// Channels our own nick has joined.
    pub joined: BTreeSet<String>,
}

/// Orchestrator settings that do not come from the connect form.
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Where `chat_history.txt` lives. `None` disables the audit log.
    pub log_dir: Option<PathBuf>,
    pub transport: TransportOptions,
    /// How long the server may take to send `001` once the stream is up.
    pub registration_timeout: Duration,
    pub opener: Arc<dyn Opener>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_dir: crate::log::default_log_dir(),
            transport: TransportOptions::default(),
            registration_timeout: Duration::from_secs(60),
            opener: Arc::new(SystemOpener),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("log_dir", &self.log_dir)
            .field("transport", &self.transport)
            .field("registration_timeout", &self.registration_timeout)
            .finish_non_exhaustive()
    }
}

/// Commands from the presentation layer. `done` fires once the command
/// has been processed.
pub(crate) enum Request {
    Connect {
        request: Box<ConnectionRequest>,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Send {
        target: String,
        body: String,
        done: oneshot::Sender<()>,
    },
    OpenLogs {
        done: oneshot::Sender<()>,
    },
    OpenUrl {
        url: String,
        done: oneshot::Sender<()>,
    },
}

/// Messages from the transport-building task back to the actor.
enum Progress {
    Phase(SessionId, Phase),
    Built(SessionId, Result<Transport, ConnectError>),
}

/// A connect whose transport is still being built.
struct PendingConnect {
    id: SessionId,
    request: ConnectionRequest,
    task: JoinHandle<()>,
}

/// The live session. Transport and protocol client are owned together
/// through `client` and released together by [`Session::release`].
struct Session {
    id: SessionId,
    client: Client,
    subscription: Subscription,
    adapter: EventAdapter,
    nick: String,
    joined: BTreeSet<String>,
    created_at: DateTime<Local>,
    registration_deadline: Option<Instant>,
}

impl Session {
    async fn release(self, quit_message: Option<&str>) {
        let Session {
            id,
            client,
            subscription,
            created_at,
            ..
        } = self;
        subscription.unregister();
        client.close(quit_message).await;
        tracing::info!(
            "session {id} released after {}s",
            (Local::now() - created_at).num_seconds()
        );
    }
}

enum Activity {
    Event(SessionId, Event),
    ClientStopped(SessionId),
    RegistrationTimeout(SessionId),
}

pub(crate) struct SessionManager {
    config: OrchestratorConfig,
    log: LogWriter,
    sink: EventSink,
    state: watch::Sender<SessionState>,
    info: watch::Sender<Option<SessionInfo>>,
    session: Option<Session>,
    pending: Option<PendingConnect>,
    next_id: u64,
    progress_tx: mpsc::UnboundedSender<Progress>,
    progress_rx: mpsc::UnboundedReceiver<Progress>,
}

impl SessionManager {
    pub(crate) fn new(
        config: OrchestratorConfig,
        log: LogWriter,
        sink: EventSink,
        state: watch::Sender<SessionState>,
        info: watch::Sender<Option<SessionInfo>>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            config,
            log,
            sink,
            state,
            info,
            session: None,
            pending: None,
            next_id: 0,
            progress_tx,
            progress_rx,
        }
    }

    /// Actor loop. Returns once every command sender is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(progress) = self.progress_rx.recv() => self.handle_progress(progress).await,
                activity = session_activity(&mut self.session) => {
                    self.handle_activity(activity).await
                }
            }
        }
        self.teardown(Some("Client exiting")).await;
        tracing::debug!("session manager stopped");
    }

    fn transition(&self, to: SessionState) {
        let from = *self.state.borrow();
        if from == to {
            return;
        }
        if !from.can_transition(to) {
            tracing::warn!("refusing session transition {from:?} -> {to:?}");
            return;
        }
        tracing::debug!("session state {from:?} -> {to:?}");
        self.state.send_replace(to);
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn publish_info(&self) {
        let info = self.session.as_ref().map(|s| SessionInfo {
            nick: s.nick.clone(),
            joined: s.joined.clone(),
        });
        self.info.send_replace(info);
    }

    async fn handle_command(&mut self, cmd: Request) {
        match cmd {
            Request::Connect { request, done } => {
                self.connect(*request).await;
                let _ = done.send(());
            }
            Request::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Request::Send { target, body, done } => {
                self.send_message(&target, &body).await;
                let _ = done.send(());
            }
            Request::OpenLogs { done } => {
                self.open_logs().await;
                let _ = done.send(());
            }
            Request::OpenUrl { url, done } => {
                self.open_url(url).await;
                let _ = done.send(());
            }
        }
    }

    async fn connect(&mut self, request: ConnectionRequest) {
        tracing::info!("[net] connect requested: {} as {}", request.server_addr(), request.nick);
        self.teardown(Some("Reconnecting")).await;

        if let Err(e) = request.validate() {
            self.fail(SessionError::from(e)).await;
            return;
        }

        self.next_id += 1;
        let id = SessionId(self.next_id);
        let progress = self.progress_tx.clone();
        let options = self.config.transport.clone();
        let build_request = request.clone();
        let task = tokio::spawn(async move {
            let phases = progress.clone();
            let result = transport::build(&build_request, &options, |phase| {
                let _ = phases.send(Progress::Phase(id, phase));
            })
            .await;
            let _ = progress.send(Progress::Built(id, result));
        });

        self.pending = Some(PendingConnect { id, request, task });
    }

    async fn handle_progress(&mut self, progress: Progress) {
        let current = self.pending.as_ref().map(|p| p.id);
        match progress {
            Progress::Phase(id, phase) if Some(id) == current => match phase {
                Phase::TunnelPending => self.transition(SessionState::TunnelPending),
                Phase::TlsHandshake => self.transition(SessionState::TlsHandshake),
            },
            Progress::Built(id, result) if Some(id) == current => {
                let Some(pending) = self.pending.take() else { return };
                match result {
                    Ok(transport) => self.start_session(pending, transport),
                    Err(e) => self.fail(SessionError::from(e)).await,
                }
            }
            Progress::Phase(id, _) | Progress::Built(id, _) => {
                tracing::debug!("discarding stale handshake result for session {id}");
            }
        }
    }

    fn start_session(&mut self, pending: PendingConnect, transport: Transport) {
        let PendingConnect { id, request, .. } = pending;
        self.transition(SessionState::Registering);
        tracing::info!("[net] registering as {} (session {id})", request.nick);

        let (client, events) = Client::spawn(
            transport,
            ClientConfig::new(&request.nick, &request.client_tag),
        );
        let adapter = EventAdapter::new(
            &request.server,
            request.channel_list(),
            self.log.clone(),
            self.sink.clone(),
        );

        self.session = Some(Session {
            id,
            client,
            subscription: Subscription::register(id, events),
            adapter,
            nick: request.nick,
            joined: BTreeSet::new(),
            created_at: Local::now(),
            registration_deadline: Some(Instant::now() + self.config.registration_timeout),
        });
        self.publish_info();
    }

    async fn handle_activity(&mut self, activity: Activity) {
        let current = self.session.as_ref().map(|s| s.id);
        match activity {
            Activity::Event(id, event) if Some(id) == current => self.handle_event(event).await,
            Activity::ClientStopped(id) if Some(id) == current => {
                self.fail(SessionError::UnexpectedDisconnect(
                    "protocol client stopped".to_string(),
                ))
                .await;
            }
            Activity::RegistrationTimeout(id) if Some(id) == current => {
                let after = self.config.registration_timeout;
                self.fail(SessionError::RegistrationTimeout(after)).await;
            }
            _ => {}
        }
    }

    async fn handle_event(&mut self, event: Event) {
        let Some(session) = self.session.as_mut() else { return };
        match session.adapter.handle(event, session.client.handle()).await {
            Outcome::Continue => {}
            Outcome::Registered { nick } => {
                session.nick = nick;
                session.registration_deadline = None;
                self.transition(SessionState::Active);
                self.publish_info();
                if let Some(session) = self.session.as_mut() {
                    session.adapter.announce_connected(&session.nick);
                }
            }
            Outcome::Joined { channel, nick } => {
                if nick.eq_ignore_ascii_case(&session.nick) {
                    session.joined.insert(channel);
                }
            }
            Outcome::Closed { reason } => {
                self.fail(SessionError::UnexpectedDisconnect(reason)).await;
            }
        }
        self.publish_info();
    }

    /// Abort the attempt, release everything, report once.
    async fn fail(&mut self, err: SessionError) {
        tracing::error!("[net] connection failed: {err}");
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
        if let Some(session) = self.session.take() {
            session.release(None).await;
            self.publish_info();
        }
        self.transition(SessionState::Failed);
        self.sink.status(format!("ERROR: {err}"));
        self.log.record(
            LogKind::Err,
            "System",
            "Local",
            &format!("Connection Failed: {err}"),
        );
    }

    async fn disconnect(&mut self) {
        if self.session.is_none() && self.pending.is_none() {
            if self.current_state() == SessionState::Failed {
                self.transition(SessionState::Idle);
            }
            return;
        }
        tracing::info!("[net] disconnect requested");
        self.teardown(None).await;
    }

    /// Cancel any in-flight connect and close the live session, leaving
    /// the manager `Idle`.
    async fn teardown(&mut self, quit_message: Option<&str>) {
        if self.current_state().is_in_progress() {
            self.transition(SessionState::Closing);
        }
        if let Some(pending) = self.pending.take() {
            tracing::debug!("cancelling handshake for session {}", pending.id);
            pending.task.abort();
        }
        if let Some(session) = self.session.take() {
            session.release(quit_message).await;
            self.publish_info();
        }
        self.transition(SessionState::Idle);
    }

    async fn send_message(&mut self, target: &str, body: &str) {
        let session = match self.session.as_ref() {
            Some(s) if self.current_state() == SessionState::Active => s,
            _ => {
                tracing::debug!("send to {target} ignored: no active session");
                return;
            }
        };
        if target.is_empty() || body.is_empty() {
            return;
        }
        match session.client.handle().privmsg(target, body).await {
            Ok(()) => self.log.record(LogKind::Sent, &session.nick, target, body),
            Err(e) => tracing::warn!("send to {target} failed: {e}"),
        }
    }

    async fn open_logs(&self) {
        let Some(dir) = self.log.dir().map(|d| d.to_path_buf()) else {
            tracing::warn!("no log directory configured");
            return;
        };
        let opener = Arc::clone(&self.config.opener);
        let result =
            tokio::task::spawn_blocking(move || desktop::reveal_dir(opener.as_ref(), &dir)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("cannot open log folder: {e}"),
            Err(e) => tracing::warn!("log folder opener panicked: {e}"),
        }
    }

    async fn open_url(&self, url: String) {
        if !desktop::is_web_url(&url) {
            tracing::debug!("refusing to open non-web url {url:?}");
            return;
        }
        let opener = Arc::clone(&self.config.opener);
        let result = tokio::task::spawn_blocking(move || opener.open_url(&url)).await;
        if let Ok(Err(e)) = result {
            tracing::warn!("cannot open url: {e}");
        }
    }
}

/// Wait for the live session to produce something. Pends forever when
/// there is no session.
async fn session_activity(session: &mut Option<Session>) -> Activity {
    let Some(session) = session.as_mut() else {
        return std::future::pending().await;
    };
    let id = session.id;
    let deadline = session.registration_deadline;
    tokio::select! {
        event = session.subscription.next() => match event {
            Some(event) => Activity::Event(id, event),
            None => Activity::ClientStopped(id),
        },
        _ = sleep_until(deadline) => Activity::RegistrationTimeout(id),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    #[test]
    fn connect_path_moves_forward_only() {
        assert!(Idle.can_transition(TunnelPending));
        assert!(Idle.can_transition(TlsHandshake));
        assert!(Idle.can_transition(Registering));
        assert!(TunnelPending.can_transition(TlsHandshake));
        assert!(TlsHandshake.can_transition(Registering));
        assert!(Registering.can_transition(Active));

        assert!(!Active.can_transition(Registering));
        assert!(!TlsHandshake.can_transition(TunnelPending));
    }

    #[test]
    fn idle_is_reached_only_through_closing_or_failed() {
        assert!(Closing.can_transition(Idle));
        assert!(Failed.can_transition(Idle));
        assert!(!Active.can_transition(Idle));
        assert!(!Registering.can_transition(Idle));
    }

    #[test]
    fn any_attempt_can_fail() {
        for s in [Idle, TunnelPending, TlsHandshake, Registering, Active] {
            assert!(s.can_transition(Failed), "{s:?} -> Failed");
        }
        assert!(!Closing.can_transition(Failed));
        assert!(!Failed.can_transition(Failed));
    }

    #[test]
    fn closing_only_from_live_states() {
        for s in [TunnelPending, TlsHandshake, Registering, Active] {
            assert!(s.can_transition(Closing));
        }
        assert!(!Idle.can_transition(Closing));
        assert!(!Failed.can_transition(Closing));
        assert!(!Closing.can_transition(Active));
    }

    #[test]
    fn session_ids_display() {
        assert_eq!(SessionId(7).to_string(), "#7");
    }

    struct Fixture {
        manager: SessionManager,
        events: tokio::sync::broadcast::Receiver<crate::chat::UiEvent>,
        state: watch::Receiver<SessionState>,
        info: watch::Receiver<Option<SessionInfo>>,
    }

    fn fixture() -> Fixture {
        let (tx, events) = tokio::sync::broadcast::channel(16);
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let (info_tx, info) = watch::channel(None);
        let config = OrchestratorConfig {
            log_dir: None,
            ..OrchestratorConfig::default()
        };
        let log = LogWriter::spawn(None);
        let manager = SessionManager::new(config, log, EventSink::new(tx), state_tx, info_tx);
        Fixture {
            manager,
            events,
            state,
            info,
        }
    }

    #[tokio::test]
    async fn late_handshake_result_after_disconnect_is_discarded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut f = fixture();

        let mut req = ConnectionRequest::new("neo", "127.0.0.1");
        req.port = port;
        req.tls = false;
        f.manager.connect(req).await;
        let stale_id = f.manager.pending.as_ref().map(|p| p.id).unwrap();
        f.manager.disconnect().await;
        assert!(f.manager.pending.is_none());

        // A finished transport for the cancelled attempt turns up afterwards.
        let stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        f.manager
            .handle_progress(Progress::Phase(stale_id, Phase::TlsHandshake))
            .await;
        f.manager
            .handle_progress(Progress::Built(stale_id, Ok(Transport::Plain(stream))))
            .await;
        while let Ok(progress) = f.manager.progress_rx.try_recv() {
            f.manager.handle_progress(progress).await;
        }

        assert!(f.manager.session.is_none());
        assert_eq!(*f.state.borrow(), SessionState::Idle);
        assert!(f.info.borrow().is_none());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn joined_channels_and_confirmed_nick_are_published() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let mut f = fixture();
        let (client, events) = Client::spawn_on(client_side, ClientConfig::new("neo", "jbIRC"));
        let sink = f.manager.sink.clone();
        f.manager.session = Some(Session {
            id: SessionId(1),
            client,
            subscription: Subscription::register(SessionId(1), events),
            adapter: EventAdapter::new("irc.test", vec![], f.manager.log.clone(), sink),
            nick: "neo".into(),
            joined: BTreeSet::new(),
            created_at: Local::now(),
            registration_deadline: None,
        });
        f.manager.transition(SessionState::Registering);

        f.manager.handle_event(Event::Registered { nick: "neo_".into() }).await;
        f.manager
            .handle_event(Event::Joined { channel: "#a".into(), nick: "neo_".into() })
            .await;
        f.manager
            .handle_event(Event::Joined { channel: "#b".into(), nick: "smith".into() })
            .await;

        let info = f.info.borrow().clone().unwrap();
        assert_eq!(info.nick, "neo_");
        assert_eq!(info.joined.into_iter().collect::<Vec<_>>(), vec!["#a".to_string()]);
        assert_eq!(*f.state.borrow(), SessionState::Active);

        f.manager.disconnect().await;
        assert!(f.info.borrow().is_none());
        drop(server_side);
    }
}
