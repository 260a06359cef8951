// Serverless LAN peer: UDP broadcast send path and receive loop

use crate::chat::command::Command;
use crate::chat::config::PeerConfig;
use crate::chat::envelope::{Envelope, MAX_DATAGRAM};
use crate::chat::error::ChatError;
use crate::chat::identity::Identity;
use crate::chat::moderation::{ModerationCommand, ModerationState};
use crate::chat::replicator::{describe, Replicator};
use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One participant on the shared broadcast channel
pub struct LanPeer {
    replicator: Arc<Replicator>,
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl LanPeer {
    /// Bind the well-known port on all interfaces with broadcast enabled
    pub async fn bind(config: &PeerConfig) -> Result<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind UDP port {}", config.port))?;
        socket
            .set_broadcast(true)
            .context("Failed to enable broadcast on socket")?;

        let target = SocketAddr::V4(SocketAddrV4::new(config.broadcast_addr, config.port));
        Ok(Self::with_socket(config, Identity::generate(), socket, target))
    }

    /// Build a peer on an existing socket that transmits to `target`
    pub fn with_socket(
        config: &PeerConfig,
        identity: Identity,
        socket: UdpSocket,
        target: SocketAddr,
    ) -> Self {
        let state = ModerationState::with_admins(config.admins.iter().cloned());
        Self {
            replicator: Arc::new(Replicator::new(identity, config.name.as_str(), state)),
            socket: Arc::new(socket),
            target,
        }
    }

    pub fn replicator(&self) -> Arc<Replicator> {
        self.replicator.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("Failed to read local address")
    }

    /// Send one frame. No retry and no confirmation.
    pub async fn transmit(&self, envelope: &Envelope) -> Result<()> {
        self.socket
            .send_to(&envelope.to_bytes(), self.target)
            .await
            .with_context(|| format!("Failed to broadcast to {}", self.target))?;
        Ok(())
    }

    /// Start the receive loop; displayable lines go to `render`.
    ///
    /// Read errors are logged and the loop keeps going. It ends when `render`
    /// is dropped.
    pub fn spawn_receiver(&self, render: mpsc::UnboundedSender<String>) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let replicator = self.replicator.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let outcome = replicator.receive(&buf[..len]).await;
                        tracing::debug!("Datagram from {}: {:?}", from, outcome);
                        if let Some(line) = outcome.render() {
                            if render.send(line).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("UDP receive error: {}", e);
                    }
                }
            }
        })
    }

    /// Send path for one line of local input.
    ///
    /// Returns the line to show locally, if any.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => return Some(format!("[Error] {}", e)),
        };

        let notice = match command {
            Command::Chat(text) => {
                let envelope = self.replicator.chat(&text);
                self.send_logged(&envelope).await;
                self.replicator.chat_line(&text)
            }
            Command::Ban(_) | Command::Unban(_) | Command::Grant(_) | Command::Revoke(_) => {
                let (action, target) = command.moderation()?;
                match self.replicator.issue(action, target).await {
                    Ok(envelope) => {
                        self.send_logged(&envelope).await;
                        describe(&ModerationCommand::new(action, target, self.replicator.name()))
                    }
                    Err(ChatError::NotAuthorized(_)) => {
                        "[Error] You do not have permission to do that".to_string()
                    }
                    Err(e) => format!("[Error] {}", e),
                }
            }
            Command::Send => "[System] File sharing is not available".to_string(),
            Command::Nick(_) | Command::Admin(_) | Command::System(_) => {
                "[System] That command only works when connected to a server".to_string()
            }
            Command::Unknown(name) => format!("[System] Unknown command: {}", name),
        };

        Some(notice)
    }

    async fn send_logged(&self, envelope: &Envelope) {
        if let Err(e) = self.transmit(envelope).await {
            tracing::warn!("{:#}", e);
        }
    }

    /// Interactive loop: stdin lines in, rendered lines to stdout
    pub async fn run(self) -> Result<()> {
        let own_ip = local_ip().await;
        if self.replicator.is_banned(&own_ip.to_string()).await {
            anyhow::bail!("This address ({}) is banned", own_ip);
        }

        tracing::info!(
            "Peer {} ({}) listening on {}",
            self.replicator.name(),
            self.replicator.identity(),
            self.local_addr()?
        );
        println!(
            "You are {} (id {})",
            self.replicator.name(),
            self.replicator.identity()
        );

        self.send_logged(&self.replicator.announce_join()).await;

        let (render_tx, mut render_rx) = mpsc::unbounded_channel::<String>();
        let receiver = self.spawn_receiver(render_tx.clone());
        let printer = tokio::spawn(async move {
            while let Some(line) = render_rx.recv().await {
                println!("{}", line);
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            if let Some(notice) = self.handle_line(&line).await {
                if render_tx.send(notice).is_err() {
                    break;
                }
            }
        }

        receiver.abort();
        drop(render_tx);
        let _ = printer.await;
        Ok(())
    }
}

/// Address of the interface that routes to the outside, or loopback
pub async fn local_ip() -> Ipv4Addr {
    async fn probe() -> std::io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(("8.8.8.8", 80)).await?;
        match socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(*addr.ip()),
            SocketAddr::V6(_) => Ok(Ipv4Addr::LOCALHOST),
        }
    }

    probe().await.unwrap_or(Ipv4Addr::LOCALHOST)
}
