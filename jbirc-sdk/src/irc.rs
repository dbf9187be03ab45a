//! IRC line codec.
//!
//! Only what the orchestrator needs: parse inbound lines into a
//! [`Message`], format outbound commands, and unwrap CTCP payloads.
//! IRCv3 tags are tolerated on input and discarded.

use std::fmt;

/// A parsed IRC protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse a raw IRC line. Returns `None` for blank or malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // Tags are never negotiated, but some bouncers send them anyway.
        if rest.starts_with('@') {
            let (_, after) = rest.split_once(' ')?;
            rest = after.trim_start();
        }

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (pfx, after) = stripped.split_once(' ')?;
                rest = after.trim_start();
                Some(pfx.to_string())
            }
            None => None,
        };

        let (command, mut tail) = match rest.split_once(' ') {
            Some((cmd, tail)) => (cmd, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            tail = tail.trim_start_matches(' ');
            if tail.is_empty() {
                break;
            }
            if let Some(trailing) = tail.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match tail.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    tail = after;
                }
                None => {
                    params.push(tail.to_string());
                    break;
                }
            }
        }

        Some(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Build an outbound message with no prefix.
    pub fn new(command: &str, params: &[&str]) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Nick portion of the prefix (`nick!user@host` → `nick`).
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty())
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                param.is_empty() || param.contains(' ') || param.starts_with(':');
            if i == last && needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// A CTCP request or reply embedded in a PRIVMSG/NOTICE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctcp<'a> {
    pub command: &'a str,
    pub args: &'a str,
}

/// Unwrap `\x01COMMAND args\x01`. The closing delimiter is optional,
/// some clients omit it.
pub fn parse_ctcp(body: &str) -> Option<Ctcp<'_>> {
    let inner = body.strip_prefix('\u{1}')?;
    let inner = inner.strip_suffix('\u{1}').unwrap_or(inner);
    let (command, args) = inner.split_once(' ').unwrap_or((inner, ""));
    if command.is_empty() {
        return None;
    }
    Some(Ctcp { command, args })
}

/// Wrap a CTCP payload for sending.
pub fn ctcp(command: &str, args: &str) -> String {
    if args.is_empty() {
        format!("\u{1}{command}\u{1}")
    } else {
        format!("\u{1}{command} {args}\u{1}")
    }
}

/// True if the target names a channel rather than a nick.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}
