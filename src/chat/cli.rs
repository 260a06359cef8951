// CLI commands for the chat server and LAN peer

use crate::chat::config::{
    PeerConfig, ServerConfig, BOOTSTRAP_ADMIN, DEFAULT_BIND, DEFAULT_OUTBOUND_CAPACITY,
    DEFAULT_PEER_PORT,
};
use crate::chat::moderation::ModerationState;
use crate::chat::peer::LanPeer;
use crate::chat::server::ChatServer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;

/// Chat CLI
#[derive(Debug, Parser)]
#[command(name = "airchat")]
#[command(about = "LAN chat: central broadcaster server or serverless UDP peers")]
pub struct ChatCli {
    #[command(subcommand)]
    pub command: ChatCommand,
}

/// Chat subcommands
#[derive(Debug, Subcommand)]
pub enum ChatCommand {
    /// Run the central chat server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,

        /// Per-session outbound buffer size; slower clients are disconnected
        #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
        buffer: usize,

        /// Password for `/admin`
        #[arg(long)]
        admin_password: Option<String>,

        /// Password for `/system`
        #[arg(long)]
        system_password: Option<String>,

        /// Do not announce joins and leaves
        #[arg(long)]
        quiet: bool,
    },

    /// Join the LAN room as a serverless peer
    Peer {
        /// Your name in the room
        #[arg(short, long)]
        name: String,

        /// UDP port shared by all peers
        #[arg(short, long, default_value_t = DEFAULT_PEER_PORT)]
        port: u16,

        /// Broadcast destination address
        #[arg(long, default_value_t = Ipv4Addr::BROADCAST)]
        broadcast_addr: Ipv4Addr,

        /// Names trusted as admins at start-up (repeatable)
        #[arg(short, long = "admin", default_values_t = [BOOTSTRAP_ADMIN.to_string()])]
        admins: Vec<String>,
    },
}

impl ChatCli {
    /// Parse from command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ChatCommand {
    /// Run the selected mode until it exits
    pub async fn execute(self) -> Result<()> {
        match self {
            ChatCommand::Serve {
                bind,
                buffer,
                admin_password,
                system_password,
                quiet,
            } => {
                let config = ServerConfig {
                    bind,
                    outbound_capacity: buffer,
                    admin_password,
                    system_password,
                    announce_presence: !quiet,
                };
                handle_serve(config).await
            }
            ChatCommand::Peer {
                name,
                port,
                broadcast_addr,
                admins,
            } => {
                let config = PeerConfig {
                    name: name.trim().to_string(),
                    port,
                    broadcast_addr,
                    admins,
                };
                handle_peer(config).await
            }
        }
    }
}

async fn handle_serve(config: ServerConfig) -> Result<()> {
    let server = ChatServer::start(config, ModerationState::new()).await?;
    println!("Chat server listening on {}", server.local_addr());
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    println!("\nStopping server...");
    server.shutdown()?;
    Ok(())
}

async fn handle_peer(config: PeerConfig) -> Result<()> {
    config.validate().context("Invalid peer name")?;
    if config.admins.iter().any(|admin| admin == &config.name) {
        println!("You are an admin");
    }

    let peer = LanPeer::bind(&config).await?;
    peer.run().await
}
