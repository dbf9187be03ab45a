//! IRC protocol client.
//!
//! Binds to an already-built [`Transport`], performs NICK/USER
//! registration and runs the read loop in a spawned task. Commands go in
//! through a [`ClientHandle`]; events come out on an mpsc receiver in
//! exactly the order the server sent them.

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::Event;
use crate::irc::{self, Message};
use crate::transport::Transport;

/// Identity and keepalive settings for one connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Realname / gecos. Also the CTCP VERSION reply.
    pub realname: String,
    /// Send a PING after this much silence from the server.
    pub ping_interval: Duration,
    /// Give up if nothing arrives this long after our PING.
    pub ping_timeout: Duration,
}

impl ClientConfig {
    pub fn new(nick: &str, client_tag: &str) -> Self {
        Self {
            nick: nick.to_string(),
            user: nick.to_string(),
            realname: client_tag.to_string(),
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub enum Command {
    Join(String),
    Privmsg { target: String, text: String },
    Quit(Option<String>),
}

/// Cheap cloneable sender for client commands.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn join(&self, channel: &str) -> Result<()> {
        self.cmd_tx.send(Command::Join(channel.to_string())).await?;
        Ok(())
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(str::to_string)))
            .await?;
        Ok(())
    }
}

/// A running protocol client. Owns the task that owns the transport, so
/// dropping or closing this releases the socket.
#[derive(Debug)]
pub struct Client {
    handle: ClientHandle,
    task: JoinHandle<()>,
}

impl Client {
    /// Start the protocol on `transport`. Registration lines are written
    /// immediately.
    pub fn spawn(transport: Transport, config: ClientConfig) -> (Client, mpsc::Receiver<Event>) {
        Self::spawn_on(transport, config)
    }

    /// Same as [`Client::spawn`] for any byte stream. Used by tests with
    /// in-memory pipes.
    pub fn spawn_on<S>(stream: S, config: ClientConfig) -> (Client, mpsc::Receiver<Event>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(stream);
            let reader = BufReader::new(reader);
            let reason = match run_irc(reader, writer, &config, &event_tx, cmd_rx).await {
                Ok(Exit::Quit) => None,
                Ok(Exit::Lost(reason)) => Some(reason),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = reason {
                let _ = event_tx.send(Event::Disconnected { reason }).await;
            }
        });

        (
            Client {
                handle: ClientHandle { cmd_tx },
                task,
            },
            event_rx,
        )
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// Send QUIT and release the connection. Waits briefly for the QUIT
    /// line to be flushed, then aborts the task regardless.
    pub async fn close(mut self, message: Option<&str>) {
        let _ = self.handle.quit(message).await;
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            tracing::debug!("protocol task did not exit after QUIT, aborting");
            self.task.abort();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Exit {
    /// We sent QUIT or every handle was dropped.
    Quit,
    /// The server went away.
    Lost(String),
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ClientConfig,
    event_tx: &mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<Exit>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut nick = config.nick.clone();
    send(&mut writer, &Message::new("NICK", &[&nick])).await?;
    send(
        &mut writer,
        &Message::new("USER", &[&config.user, "0", "*", &config.realname]),
    )
    .await?;

    let mut registered = false;
    let mut pending: Vec<Command> = Vec::new();
    // Raw bytes of the line being read. Kept across iterations so a
    // partial line survives another select branch winning.
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = tokio::time::Instant::now();
    let mut awaiting_pong = false;

    loop {
        let deadline = if awaiting_pong {
            last_activity + config.ping_timeout
        } else {
            last_activity + config.ping_interval
        };

        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                if result? == 0 {
                    return Ok(Exit::Lost("connection closed by server".to_string()));
                }
                last_activity = tokio::time::Instant::now();
                awaiting_pong = false;
                // Servers relay whatever encoding other users send.
                let line = String::from_utf8_lossy(&line_buf).into_owned();
                line_buf.clear();
                tracing::debug!("<< {}", line.trim_end());

                if let Some(msg) = Message::parse(&line) {
                    match msg.command.as_str() {
                        "PING" => {
                            let token = msg.param(0).unwrap_or_default();
                            send(&mut writer, &Message::new("PONG", &[token])).await?;
                        }
                        "001" if !registered => {
                            if let Some(confirmed) = msg.param(0) {
                                nick = confirmed.to_string();
                            }
                            registered = true;
                            let _ = event_tx.send(Event::Registered { nick: nick.clone() }).await;
                            for cmd in pending.drain(..) {
                                execute_command(&mut writer, cmd).await?;
                            }
                        }
                        // ERR_NICKNAMEINUSE: keep appending '_' until the server accepts.
                        "433" if !registered => {
                            nick.push('_');
                            tracing::info!("nick in use, retrying as {nick}");
                            send(&mut writer, &Message::new("NICK", &[&nick])).await?;
                        }
                        "JOIN" => {
                            if let (Some(channel), Some(who)) = (msg.param(0), msg.source_nick()) {
                                let _ = event_tx.send(Event::Joined {
                                    channel: channel.to_string(),
                                    nick: who.to_string(),
                                }).await;
                            }
                        }
                        "PRIVMSG" | "NOTICE" => {
                            let event = incoming_message(&msg, config, &mut writer).await?;
                            if let Some(event) = event {
                                let _ = event_tx.send(event).await;
                            }
                        }
                        "ERROR" => {
                            let reason = msg.param(0).unwrap_or("server closed the link");
                            return Ok(Exit::Lost(reason.to_string()));
                        }
                        _ => {}
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Quit(message)) => {
                        execute_command(&mut writer, Command::Quit(message)).await?;
                        let _ = writer.shutdown().await;
                        return Ok(Exit::Quit);
                    }
                    Some(cmd) if registered => execute_command(&mut writer, cmd).await?,
                    Some(cmd) => pending.push(cmd),
                    None => {
                        let _ = execute_command(&mut writer, Command::Quit(None)).await;
                        return Ok(Exit::Quit);
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if awaiting_pong {
                    return Ok(Exit::Lost("ping timeout".to_string()));
                }
                send(&mut writer, &Message::new("PING", &["keepalive"])).await?;
                awaiting_pong = true;
            }
        }
    }
}

/// Turn a PRIVMSG/NOTICE into an event, answering CTCP VERSION inline.
async fn incoming_message<W: AsyncWrite + Unpin>(
    msg: &Message,
    config: &ClientConfig,
    writer: &mut W,
) -> Result<Option<Event>> {
    let (Some(target), Some(body)) = (msg.param(0), msg.param(1)) else {
        return Ok(None);
    };
    let from = msg.source_nick().unwrap_or_default().to_string();

    let text = match irc::parse_ctcp(body) {
        None => body.to_string(),
        Some(ctcp) if ctcp.command == "ACTION" => format!("* {from} {}", ctcp.args),
        Some(ctcp) => {
            if ctcp.command == "VERSION" && msg.command == "PRIVMSG" && !from.is_empty() {
                let reply = irc::ctcp("VERSION", &config.realname);
                send(writer, &Message::new("NOTICE", &[&from, &reply])).await?;
            }
            return Ok(None);
        }
    };

    Ok(Some(Event::Message {
        from,
        target: target.to_string(),
        text,
    }))
}

async fn execute_command<W: AsyncWrite + Unpin>(writer: &mut W, cmd: Command) -> Result<()> {
    let msg = match cmd {
        Command::Join(channel) => Message::new("JOIN", &[&channel]),
        Command::Privmsg { target, text } => {
            let text = single_line(&text);
            Message::new("PRIVMSG", &[&target, &text])
        }
        Command::Quit(Some(reason)) => Message::new("QUIT", &[&single_line(&reason)]),
        Command::Quit(None) => Message::new("QUIT", &[]),
    };
    send(writer, &msg).await
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    tracing::debug!(">> {msg}");
    writer.write_all(format!("{msg}\r\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// CR/LF inside user text would inject extra protocol lines.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
