//! Listener and per-connection plumbing.
//!
//! Each connection gets a reader loop feeding an [`EventHandler`] and a
//! writer task draining its outgoing event channel, so events go out in the
//! order the handler produced them.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::Synthesizer;
use crate::handler::{EventHandler, HandlerSettings};
use crate::normalizer::TextNormalizer;
use crate::protocol::{self, Event, Info};

const EVENT_QUEUE: usize = 256;

#[derive(Debug, Error)]
pub enum UriError {
    #[error("Unsupported URI '{0}', expected tcp://host:port or unix://path")]
    Unsupported(String),

    #[error("Missing port in '{0}'")]
    MissingPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = UriError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = uri.strip_prefix("tcp://") {
            let has_port = addr
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !has_port {
                return Err(UriError::MissingPort(uri.to_string()));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        match uri.strip_prefix("unix://") {
            Some(path) if !path.is_empty() => Ok(Self::Unix(PathBuf::from(path))),
            _ => Err(UriError::Unsupported(uri.to_string())),
        }
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Everything a connection needs, shared between all of them.
#[derive(Clone)]
pub struct ServerState {
    pub info: Arc<Info>,
    pub settings: Arc<HandlerSettings>,
    pub normalizer: Arc<TextNormalizer>,
    pub synthesizer: Synthesizer,
}

impl ServerState {
    fn handler(&self, events: mpsc::Sender<Event>) -> EventHandler {
        EventHandler::new(
            self.info.clone(),
            self.settings.clone(),
            self.normalizer.clone(),
            self.synthesizer.clone(),
            events,
        )
    }
}

/// Accept connections forever.
pub async fn serve(addr: &ListenAddr, state: ServerState) -> std::io::Result<()> {
    match addr {
        ListenAddr::Tcp(host_port) => {
            let listener = TcpListener::bind(host_port).await?;
            info!("Listening on {addr}");
            loop {
                let (stream, peer) = listener.accept().await?;
                let state = state.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, state, peer.to_string()).await;
                });
            }
        }
        ListenAddr::Unix(path) => {
            if path.exists() {
                debug!("Removing stale socket {}", path.display());
                std::fs::remove_file(path)?;
            }
            let listener = UnixListener::bind(path)?;
            info!("Listening on {addr}");
            let mut next_id: u64 = 0;
            loop {
                let (stream, _) = listener.accept().await?;
                next_id += 1;
                let state = state.clone();
                let peer = format!("unix#{next_id}");
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, state, peer).await;
                });
            }
        }
    }
}

/// Serve one client until it disconnects or sends something unreadable.
pub async fn handle_connection<R, W>(reader: R, writer: W, state: ServerState, peer: String)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("Client connected: {peer}");
    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_QUEUE);

    let writer_peer = peer.clone();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(event) = rx.recv().await {
            if let Err(e) = protocol::write_event(&mut writer, &event).await {
                debug!("Write to {writer_peer} failed: {e}");
                break;
            }
        }
    });

    let mut handler = state.handler(tx);
    let mut reader = BufReader::new(reader);
    loop {
        match protocol::read_event(&mut reader).await {
            Ok(Some(event)) => {
                debug!("{peer} -> {} ({})", event.event_type, handler.mode());
                if !handler.handle_event(event).await {
                    break;
                }
            }
            Ok(None) => {
                handler.on_disconnect().await;
                break;
            }
            Err(e) => {
                warn!("Closing {peer}: {e}");
                handler.on_disconnect().await;
                break;
            }
        }
    }

    // Dropping the handler closes the channel and lets the writer finish.
    drop(handler);
    if let Err(e) = writer_task.await {
        warn!("Writer for {peer} panicked: {e}");
    }
    info!("Client disconnected: {peer}");
}
