//! One connected client: the host/port/interval dialogue, then status pushes
//! until the client quits or goes away.

use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::monitoring::{DeliveryError, SessionId, StatusSink, WatchService, Watcher};

pub const HOST_PROMPT: &str = "Please provide the host name.";
pub const PORT_PROMPT: &str = "Please provide the portNum.";
pub const INTERVAL_PROMPT: &str = "Please provide the polling frequency in seconds.";
pub const SERVICE_BEGINS: &str = "Service begins.";
pub const BYE: &str = "*** Bye ***";

const MAX_LINE_LENGTH: usize = 1024;

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("client disconnected before registering")]
    Disconnected,
    #[error("line codec error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("port must be a number between 1 and 65535, got {0:?}")]
    InvalidPort(String),
    #[error("interval must be a positive number of seconds, got {0:?}")]
    InvalidInterval(String),
}

/// What the client has told us so far. `None` means not asked yet.
#[derive(Debug, Default)]
struct PendingRegistration {
    host: Option<String>,
    port: Option<u16>,
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    host: String,
    port: u16,
    interval_seconds: u64,
}

impl PendingRegistration {
    fn next_prompt(&self) -> Option<&'static str> {
        if self.host.is_none() {
            Some(HOST_PROMPT)
        } else if self.port.is_none() {
            Some(PORT_PROMPT)
        } else if self.interval_seconds.is_none() {
            Some(INTERVAL_PROMPT)
        } else {
            None
        }
    }

    /// Fill the next missing field from `line`.
    fn accept(&mut self, line: &str) -> Result<(), DialogueError> {
        let line = line.trim();
        if self.host.is_none() {
            if !line.is_empty() {
                self.host = Some(line.to_string());
            }
        } else if self.port.is_none() {
            let port = line
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| DialogueError::InvalidPort(line.to_string()))?;
            self.port = Some(port);
        } else if self.interval_seconds.is_none() {
            let interval = line
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| DialogueError::InvalidInterval(line.to_string()))?;
            self.interval_seconds = Some(interval);
        }
        Ok(())
    }

    fn complete(&self) -> Option<Registration> {
        Some(Registration {
            host: self.host.clone()?,
            port: self.port?,
            interval_seconds: self.interval_seconds?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Quit,
    Reschedule,
    Ignore,
}

impl Command {
    fn parse(line: &str) -> Self {
        if line.starts_with("/quit") {
            Command::Quit
        } else if ["/host", "/port", "/freq"].iter().any(|prefix| line.starts_with(prefix)) {
            Command::Reschedule
        } else {
            Command::Ignore
        }
    }
}

/// How a registered session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Hangup,
}

/// Pushes `/status <bool>` lines into the session's outbound queue.
struct SessionSink {
    tx: mpsc::UnboundedSender<String>,
}

impl StatusSink for SessionSink {
    fn deliver_status(&self, up: bool) -> Result<(), DeliveryError> {
        self.tx.send(format!("/status {up}")).map_err(|_| DeliveryError::Closed)
    }
}

pub struct ClientSession {
    id: SessionId,
    service: Arc<WatchService>,
}

impl ClientSession {
    pub fn new(service: Arc<WatchService>) -> Self {
        Self { id: SessionId::new(), service }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Drive the session over `stream` until the client quits or disconnects.
    ///
    /// Errors before registration discard the session. After registration
    /// the watcher is always unregistered, whatever ends the session.
    pub async fn run<S>(self, stream: S) -> Result<SessionEnd, DialogueError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (sink, mut lines) = framed.split::<String>();
        let (tx, rx) = mpsc::unbounded_channel();
        let done = CancellationToken::new();
        let writer = tokio::spawn(write_lines(sink, rx, done.clone()));

        let outcome = self.serve(&mut lines, &tx).await;

        done.cancel();
        match writer.await {
            Ok(Err(e)) => debug!(session = %self.id, error = %e, "failed to flush session output"),
            Err(e) => debug!(session = %self.id, error = %e, "session writer panicked"),
            Ok(Ok(())) => {}
        }
        outcome
    }

    async fn serve<L>(
        &self,
        lines: &mut L,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<SessionEnd, DialogueError>
    where
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        let registration = match self.collect_registration(lines, tx).await {
            Ok(registration) => registration,
            Err(e) => {
                if matches!(e, DialogueError::InvalidPort(_) | DialogueError::InvalidInterval(_)) {
                    let _ = tx.send(format!("Invalid input: {e}"));
                }
                return Err(e);
            }
        };

        let sink = Arc::new(SessionSink { tx: tx.clone() });
        let watcher =
            Arc::new(Watcher::new(self.id, registration.port, registration.interval_seconds, sink));
        self.service.register(&registration.host, watcher);
        info!(
            session = %self.id,
            host = %registration.host,
            port = registration.port,
            interval_secs = registration.interval_seconds,
            "client registered"
        );
        let _ = tx.send(SERVICE_BEGINS.to_string());

        let outcome = self.serve_commands(lines).await;

        self.service.unregister(&registration.host, self.id);
        info!(session = %self.id, host = %registration.host, "client unregistered");

        if let Ok(SessionEnd::Quit) = outcome {
            let _ = tx.send(BYE.to_string());
        }
        outcome
    }

    async fn collect_registration<L>(
        &self,
        lines: &mut L,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<Registration, DialogueError>
    where
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        let mut pending = PendingRegistration::default();
        while let Some(prompt) = pending.next_prompt() {
            let _ = tx.send(prompt.to_string());
            let line = lines.next().await.ok_or(DialogueError::Disconnected)??;
            pending.accept(&line)?;
        }
        pending.complete().ok_or(DialogueError::Disconnected)
    }

    async fn serve_commands<L>(&self, lines: &mut L) -> Result<SessionEnd, DialogueError>
    where
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        while let Some(line) = lines.next().await {
            match Command::parse(&line?) {
                Command::Quit => return Ok(SessionEnd::Quit),
                Command::Reschedule => self.service.refresh(),
                Command::Ignore => {}
            }
        }
        Ok(SessionEnd::Hangup)
    }
}

/// Forward queued lines to the client until the session is done.
///
/// Whatever was queued before `done` fired is still written.
async fn write_lines<W>(
    mut sink: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    done: CancellationToken,
) -> Result<(), LinesCodecError>
where
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            line = rx.recv() => match line {
                Some(line) => sink.send(line).await?,
                None => break,
            },
            _ = done.cancelled() => {
                while let Ok(line) = rx.try_recv() {
                    sink.send(line).await?;
                }
                break;
            }
        }
    }
    sink.close().await
}
