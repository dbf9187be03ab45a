mod config;

use anyhow::Result;
use clap::Parser;
use jbirc_sdk::chat::{ChatEvent, ChatKind, UiEvent};
use jbirc_sdk::irc::is_channel;
use jbirc_sdk::{Orchestrator, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::config::Cli;

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Connect,
    Disconnect,
    Msg { target: &'a str, text: &'a str },
    Query(&'a str),
    Logs,
    Open(&'a str),
    Quit,
    Say(&'a str),
    Unknown(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Input::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Input::Say(line);
        };
        let (cmd, args) = rest.split_once(' ').unwrap_or((rest, ""));
        let args = args.trim();
        match cmd.to_ascii_lowercase().as_str() {
            "connect" | "reconnect" => Input::Connect,
            "disconnect" => Input::Disconnect,
            "msg" => match args.split_once(' ') {
                Some((target, text)) => Input::Msg { target, text: text.trim_start() },
                None => Input::Unknown(line),
            },
            "query" | "window" if !args.is_empty() => Input::Query(args),
            "logs" => Input::Logs,
            "open" if !args.is_empty() => Input::Open(args),
            "quit" | "exit" => Input::Quit,
            _ => Input::Unknown(line),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("jbirc=info".parse()?)
                .add_directive("jbirc_sdk=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let orch = Orchestrator::start(cli.orchestrator_config());
    let mut events = orch.subscribe();

    if let Some(path) = orch.log_path() {
        tracing::info!("chat log: {}", path.display());
    }
    orch.connect(cli.request()).await?;

    let mut target = cli.channels.first().cloned();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event, cli.json)?,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("display fell behind, {n} events skipped")
                }
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Empty => {}
                    Input::Connect => orch.connect(cli.request()).await?,
                    Input::Disconnect => orch.disconnect().await?,
                    Input::Msg { target: to, text } => say(&orch, &cli, to, text).await?,
                    Input::Query(to) => {
                        target = Some(to.to_string());
                        eprintln!("now talking in {to}");
                    }
                    Input::Logs => orch.open_logs().await?,
                    Input::Open(url) => orch.open_url(url).await?,
                    Input::Quit => break,
                    Input::Say(text) => match target.as_deref() {
                        Some(to) => say(&orch, &cli, to, text).await?,
                        None => eprintln!("no channel selected; use /query <target> first"),
                    },
                    Input::Unknown(line) => eprintln!("unknown command: {line}"),
                }
            }
        }
    }

    orch.disconnect().await?;
    orch.flush_log().await;
    Ok(())
}

/// Send and show our own copy; the orchestrator does not echo sends.
async fn say(orch: &Orchestrator, cli: &Cli, target: &str, text: &str) -> Result<()> {
    orch.send(target, text).await?;
    match orch.session_info() {
        // The server may have confirmed a different nick than requested.
        Some(info) if orch.state() == SessionState::Active => {
            let echo = UiEvent::Chat(ChatEvent::new(ChatKind::Sent, &info.nick, target, text));
            print_event(&echo, cli.json)?;
        }
        _ => eprintln!("not connected"),
    }
    Ok(())
}

fn print_event(event: &UiEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        UiEvent::StatusChanged(status) => println!("*** {status}"),
        UiEvent::Chat(chat) => match chat.kind {
            ChatKind::System => {
                println!("[{}] -- {} {} {}", chat.time, chat.nick, chat.body, chat.target)
            }
            ChatKind::Message | ChatKind::Sent => {
                let place = if is_channel(&chat.target) { chat.target.as_str() } else { "query" };
                println!("[{}] ({place}) <{}> {}", chat.time, chat.nick, chat.body)
            }
        },
    }
    Ok(())
}
