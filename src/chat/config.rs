//! Runtime configuration for the server and the LAN peer.

use crate::chat::envelope::check_field;
use crate::chat::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default TCP bind address for the server.
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Default per-session outbound buffer capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// How long a removed session's writer may keep flushing before the socket is dropped.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Well-known UDP port every LAN peer listens and broadcasts on.
pub const DEFAULT_PEER_PORT: u16 = 1145;

/// Name that is an admin from the start on every peer.
pub const BOOTSTRAP_ADMIN: &str = "air";

/// Configuration for the centralized server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub bind: String,

    /// Capacity of each session's outbound buffer.
    pub outbound_capacity: usize,

    /// Password accepted by `/admin`. `None` disables the command.
    pub admin_password: Option<String>,

    /// Password accepted by `/system`. `None` disables the command.
    pub system_password: Option<String>,

    /// Whether joins and leaves are announced to the room.
    pub announce_presence: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            admin_password: None,
            system_password: None,
            announce_presence: true,
        }
    }
}

/// Configuration for a serverless LAN peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Principal name this peer acts as.
    pub name: String,

    /// UDP port shared by all peers.
    pub port: u16,

    /// Destination for outgoing broadcasts.
    pub broadcast_addr: Ipv4Addr,

    /// Names trusted as admins before any command is received.
    pub admins: Vec<String>,
}

impl PeerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Check that the name can be carried as an ADMIN issuer.
    pub fn validate(&self) -> ChatResult<()> {
        if self.name.trim().is_empty() {
            return Err(ChatError::MissingArgument("name"));
        }
        check_field(&self.name)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            port: DEFAULT_PEER_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            admins: vec![BOOTSTRAP_ADMIN.to_string()],
        }
    }
}
