//! Append-only chat audit log.
//!
//! Entries go through a bounded queue to a dedicated writer task, so a
//! slow or failing disk never stalls network handling. The file and its
//! directory are created on the first write. Write failures are reported
//! with `tracing::warn!` and otherwise ignored.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::LogWriteError;

pub const LOG_FILE_NAME: &str = "chat_history.txt";

const QUEUE_CAPACITY: usize = 1024;

/// Default per-user log directory, e.g. `~/.local/share/jbirc/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    let dir = dirs::data_dir().map(|d| d.join("jbirc").join("logs"));
    if dir.is_none() {
        tracing::warn!("chat log disabled: {}", LogWriteError::NoLogDir);
    }
    dir
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Sys,
    Msg,
    Sent,
    Err,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Sys => "SYS",
            LogKind::Msg => "MSG",
            LogKind::Sent => "SENT",
            LogKind::Err => "ERR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub kind: LogKind,
    pub nick: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, nick: &str, target: &str, message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            nick: nick.to_string(),
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    /// `[12/17/2025, 10:00:00 AM] [MSG] <nick> (#channel): text\n`
    pub fn line(&self) -> String {
        format!(
            "[{}] [{}] <{}> ({}): {}\n",
            self.timestamp.format("%-m/%-d/%Y, %-I:%M:%S %p"),
            self.kind.as_str(),
            self.nick,
            self.target,
            self.message.replace(['\r', '\n'], " "),
        )
    }
}

enum Op {
    Append(LogEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. Cloning shares the same queue and file.
#[derive(Debug, Clone)]
pub struct LogWriter {
    /// `None` when logging is turned off.
    tx: Option<mpsc::Sender<Op>>,
    dir: Option<PathBuf>,
}

impl LogWriter {
    /// Start the writer task for `dir`. `None` turns the log off: no task
    /// is started and entries are discarded silently.
    pub fn spawn(dir: Option<PathBuf>) -> Self {
        let tx = dir.clone().map(|dir| {
            let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
            tokio::spawn(run_writer(dir, rx));
            tx
        });
        Self { tx, dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(LOG_FILE_NAME))
    }

    /// Queue an entry. Never blocks; a full queue drops the entry.
    pub fn append(&self, entry: LogEntry) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(Op::Append(entry)) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("chat log: {}", LogWriteError::QueueFull);
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::warn!("chat log writer has stopped");
                }
            }
        }
    }

    pub fn record(&self, kind: LogKind, nick: &str, target: &str, message: &str) {
        self.append(LogEntry::new(kind, nick, target, message));
    }

    /// Wait until everything queued so far has reached the file.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Op::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(dir: PathBuf, mut rx: mpsc::Receiver<Op>) {
    let mut file: Option<File> = None;
    while let Some(op) = rx.recv().await {
        match op {
            Op::Append(entry) => {
                if let Err(e) = write_entry(&dir, &mut file, &entry).await {
                    tracing::warn!("chat log: {e}");
                    // Reopen on the next entry; the directory may come back.
                    file = None;
                }
            }
            Op::Flush(done) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush().await;
                }
                let _ = done.send(());
            }
        }
    }
}

async fn write_entry(
    dir: &Path,
    file: &mut Option<File>,
    entry: &LogEntry,
) -> Result<(), LogWriteError> {
    let path = dir.join(LOG_FILE_NAME);

    if file.is_none() {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| LogWriteError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| LogWriteError::Write {
                path: path.clone(),
                source,
            })?;
        *file = Some(opened);
    }

    if let Some(f) = file.as_mut() {
        let line = entry.line();
        let written = match f.write_all(line.as_bytes()).await {
            Ok(()) => f.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|source| LogWriteError::Write { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format() {
        let entry = LogEntry {
            timestamp: Local.with_ymd_and_hms(2025, 12, 17, 10, 0, 0).unwrap(),
            kind: LogKind::Msg,
            nick: "trinity".into(),
            target: "#a".into(),
            message: "hello\nworld".into(),
        };
        assert_eq!(
            entry.line(),
            "[12/17/2025, 10:00:00 AM] [MSG] <trinity> (#a): hello world\n"
        );
    }

    #[tokio::test]
    async fn creates_directory_lazily_and_appends_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("logs");
        let log = LogWriter::spawn(Some(dir.clone()));
        log.flush().await;
        assert!(!dir.exists());

        for i in 0..20 {
            log.record(LogKind::Msg, "n", "#a", &format!("m{i}"));
        }
        log.flush().await;

        let text = std::fs::read_to_string(dir.join(LOG_FILE_NAME)).unwrap();
        let bodies: Vec<&str> = text
            .lines()
            .map(|l| l.rsplit(": ").next().unwrap())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn existing_file_is_appended_not_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(LOG_FILE_NAME), "old line\n").unwrap();
        let log = LogWriter::spawn(Some(tmp.path().to_path_buf()));
        log.record(LogKind::Sys, "System", "Server", "Connected");
        log.flush().await;

        let text = std::fs::read_to_string(tmp.path().join(LOG_FILE_NAME)).unwrap();
        assert!(text.starts_with("old line\n"));
        assert!(text.ends_with("[SYS] <System> (Server): Connected\n"));
    }

    #[tokio::test]
    async fn unwritable_directory_does_not_fail_caller() {
        let tmp = tempfile::tempdir().unwrap();
        // A file where the directory should be makes create_dir_all fail.
        let blocker = tmp.path().join("logs");
        std::fs::write(&blocker, "not a dir").unwrap();

        let log = LogWriter::spawn(Some(blocker.clone()));
        log.record(LogKind::Err, "System", "Local", "boom");
        log.flush().await;
        assert!(blocker.is_file());
    }

    #[tokio::test]
    async fn no_log_dir_turns_logging_off() {
        let log = LogWriter::spawn(None);
        assert!(!log.is_enabled());
        log.record(LogKind::Msg, "n", "#a", "dropped");
        log.flush().await;
        assert!(log.path().is_none());
        assert!(log.dir().is_none());
    }

    #[tokio::test]
    async fn configured_dir_enables_logging() {
        let tmp = tempfile::tempdir().unwrap();
        let log = LogWriter::spawn(Some(tmp.path().to_path_buf()));
        assert!(log.is_enabled());
    }
}
