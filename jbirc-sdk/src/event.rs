//! Raw events raised by the protocol client, before normalization.

/// Events in the order the server produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `001` received. `nick` is the nick the server confirmed, which may
    /// differ from the requested one after a collision.
    Registered { nick: String },

    /// Someone, possibly us, joined a channel.
    Joined { channel: String, nick: String },

    /// PRIVMSG or NOTICE to a channel or to us. CTCP ACTION bodies are
    /// already rendered as `* nick text`.
    Message {
        from: String,
        target: String,
        text: String,
    },

    /// The connection ended without us sending QUIT.
    Disconnected { reason: String },
}
