//! Canonical chat events delivered to the presentation layer.

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    System,
    Message,
    Sent,
}

/// One normalized unit of chat activity. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub nick: String,
    pub target: String,
    #[serde(rename = "message")]
    pub body: String,
    pub timestamp: DateTime<Local>,
    /// Clock time shown next to the message, `HH:MM`.
    pub time: String,
}

impl ChatEvent {
    pub fn new(kind: ChatKind, nick: &str, target: &str, body: &str) -> Self {
        let timestamp = Local::now();
        Self {
            kind,
            nick: nick.to_string(),
            target: target.to_string(),
            body: body.to_string(),
            time: timestamp.format("%H:%M").to_string(),
            timestamp,
        }
    }
}

/// Everything the orchestrator pushes to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum UiEvent {
    StatusChanged(String),
    Chat(ChatEvent),
}
