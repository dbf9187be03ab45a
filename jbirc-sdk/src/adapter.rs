//! Normalizes protocol events into chat events, audit log entries and
//! status updates.
//!
//! One adapter exists per session and sees that session's events only,
//! strictly in arrival order.

use tokio::sync::mpsc;

use crate::bridge::EventSink;
use crate::chat::{ChatEvent, ChatKind};
use crate::client::ClientHandle;
use crate::event::Event;
use crate::log::{LogKind, LogWriter};
use crate::session::SessionId;

/// A session's registration on the protocol client's event stream.
///
/// Registered once when the session is created and unregistered when it
/// is released, so a previous session's listener cannot fire after a
/// reconnect.
#[derive(Debug)]
pub struct Subscription {
    session: SessionId,
    events: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn register(session: SessionId, events: mpsc::Receiver<Event>) -> Self {
        tracing::debug!("session {session}: listener registered");
        Self { session, events }
    }

    /// Next event, or `None` once the client has stopped.
    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn unregister(mut self) {
        self.events.close();
        tracing::debug!("session {}: listener unregistered", self.session);
    }
}

/// What the session manager must do after an event was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Registration finished and channel joins were issued.
    Registered { nick: String },
    Joined { channel: String, nick: String },
    Closed { reason: String },
}

pub struct EventAdapter {
    server: String,
    channels: Vec<String>,
    log: LogWriter,
    sink: EventSink,
    announced: bool,
}

impl EventAdapter {
    pub fn new(server: &str, channels: Vec<String>, log: LogWriter, sink: EventSink) -> Self {
        Self {
            server: server.to_string(),
            channels,
            log,
            sink,
            announced: false,
        }
    }

    pub async fn handle(&mut self, event: Event, client: &ClientHandle) -> Outcome {
        match event {
            Event::Registered { nick } => {
                for channel in &self.channels {
                    if let Err(e) = client.join(channel).await {
                        tracing::warn!("JOIN {channel} not sent: {e}");
                    }
                }
                Outcome::Registered { nick }
            }
            Event::Joined { channel, nick } => {
                self.log.record(LogKind::Sys, &nick, &channel, "Joined channel");
                self.sink
                    .chat(ChatEvent::new(ChatKind::System, &nick, &channel, "joined"));
                Outcome::Joined { channel, nick }
            }
            Event::Message { from, target, text } => {
                self.log.record(LogKind::Msg, &from, &target, &text);
                self.sink
                    .chat(ChatEvent::new(ChatKind::Message, &from, &target, &text));
                Outcome::Continue
            }
            Event::Disconnected { reason } => Outcome::Closed { reason },
        }
    }

    /// Log and announce the connection. Effective once per session.
    pub fn announce_connected(&mut self, nick: &str) {
        if self.announced {
            return;
        }
        self.announced = true;
        self.log.record(
            LogKind::Sys,
            "System",
            "Server",
            &format!("Connected to {} as {nick}", self.server),
        );
        self.sink.status("Connected");
    }
}
