// TCP front end for the broadcaster

use crate::chat::broker::{Broadcaster, BroadcasterHandle};
use crate::chat::config::{ServerConfig, DRAIN_GRACE};
use crate::chat::error::ChatResult;
use crate::chat::message::{ClientFrame, Message};
use crate::chat::moderation::ModerationState;
use crate::chat::session::{Session, SessionHandle};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// What the connection handler needs from the broadcaster
#[derive(Clone)]
pub struct SessionGateway {
    broadcaster: BroadcasterHandle,
    capacity: usize,
    announce: bool,
}

impl SessionGateway {
    pub fn new(broadcaster: BroadcasterHandle, config: &ServerConfig) -> Self {
        Self {
            broadcaster,
            capacity: config.outbound_capacity,
            announce: config.announce_presence,
        }
    }

    /// Register a new connection. `None` means the address is banned.
    pub async fn on_session_connected(&self, identifier: &str) -> ChatResult<Option<SessionHandle>> {
        let (session, handle) = Session::new(identifier, self.capacity);

        if !self.broadcaster.admit(session).await? {
            return Ok(None);
        }

        if self.announce {
            self.broadcaster
                .broadcast(Message::system(format!("{} joined", identifier)))?;
        }

        Ok(Some(handle))
    }

    /// Forward one raw line from the client
    pub fn on_session_message(&self, session_id: &str, raw: &str) -> ChatResult<()> {
        let raw = raw.trim_end_matches(&['\r', '\n'][..]);
        if raw.trim().is_empty() {
            return Ok(());
        }
        self.broadcaster
            .session_input(session_id, ClientFrame::parse(raw))
    }

    /// The connection is gone
    pub fn on_session_closed(&self, session_id: &str) -> ChatResult<()> {
        if self.announce {
            self.broadcaster.depart(session_id)
        } else {
            self.broadcaster.unregister(session_id)
        }
    }

    /// Drive one connection until either side finishes
    pub async fn handle_stream<S>(&self, stream: S, identifier: String) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);

        let handle = match self.on_session_connected(&identifier).await? {
            Some(handle) => handle,
            None => {
                let bytes = Message::system("Your address is banned").to_bytes()?;
                write_half.write_all(&bytes).await?;
                write_half.shutdown().await?;
                return Ok(());
            }
        };

        let SessionHandle {
            id,
            outbound,
            removed,
        } = handle;

        let writer = write_outbound(write_half, outbound);
        tokio::pin!(writer);

        // `None` once the broadcaster has dropped the session (evicted, banned, shutdown)
        let finished = tokio::select! {
            r = read_inbound(read_half, self, &id) => Some(r),
            r = &mut writer => Some(r),
            _ = removed => None,
        };

        let result = match finished {
            Some(result) => result,
            // Reader is already gone; let the writer flush what was queued, but not forever
            None => match tokio::time::timeout(DRAIN_GRACE, &mut writer).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::info!("Session {} did not drain in time, closing", id);
                    Ok(())
                }
            },
        };

        self.on_session_closed(&id)?;
        result
    }
}

/// Read lines from the client until EOF or an I/O error
async fn read_inbound<R>(read_half: R, gateway: &SessionGateway, session_id: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return Ok(()), // EOF
            Ok(_) => gateway.on_session_message(session_id, &line)?,
            Err(e) => {
                return Err(e).context("Error reading from client");
            }
        }
    }
}

/// Drain the outbound buffer to the socket; ends when the buffer is closed
async fn write_outbound<W>(mut write_half: W, mut outbound: mpsc::Receiver<Message>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let bytes = message.to_bytes()?;
        write_half
            .write_all(&bytes)
            .await
            .context("Error writing to client")?;
    }
    let _ = write_half.shutdown().await;
    Ok(())
}

/// A running chat server
pub struct ChatServer {
    local_addr: SocketAddr,
    broadcaster: BroadcasterHandle,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl ChatServer {
    /// Bind, spawn the broadcaster and start accepting connections
    pub async fn start(config: ServerConfig, moderation: ModerationState) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;
        let local_addr = listener.local_addr()?;

        let broadcaster = Broadcaster::spawn(config.clone(), moderation);
        let gateway = SessionGateway::new(broadcaster.clone(), &config);
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            Self::run_listener(listener, gateway, &mut shutdown_rx).await;
        });

        tracing::info!("Listening on {}", local_addr);

        Ok(Self {
            local_addr,
            broadcaster,
            shutdown_tx,
        })
    }

    async fn run_listener(
        listener: TcpListener,
        gateway: SessionGateway,
        shutdown_rx: &mut mpsc::UnboundedReceiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gateway = gateway.clone();
                            tokio::spawn(async move {
                                if let Err(e) = gateway.handle_stream(stream, addr.to_string()).await {
                                    tracing::warn!("Connection {} ended: {:#}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Listener shutting down");
                    break;
                }
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broadcaster(&self) -> BroadcasterHandle {
        self.broadcaster.clone()
    }

    /// Stop accepting and close every session
    pub fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.broadcaster
            .shutdown()
            .context("Failed to send shutdown command")?;
        Ok(())
    }
}
