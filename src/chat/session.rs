// Per-connection session state and its bounded delivery buffer

use crate::chat::message::{Message, Role};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The consumer is too slow; the caller must evict
    Full,
    /// The writer side has already gone away
    Closed,
}

/// A connected participant as seen by the broadcaster.
///
/// Only the broadcaster holds these. Dropping one closes the outbound buffer
/// and fires the handle's `removed` signal, so the connection is torn down
/// even when its writer is stuck on a stalled socket.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    /// Remote IP (no port), used for ban checks
    pub address: String,
    /// `ip:port` of the connection
    pub identifier: String,
    outbound: mpsc::Sender<Message>,
    /// Never sent on; dropped together with the session
    _removed: oneshot::Sender<()>,
}

/// The consumer end handed back to the connection handler
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub outbound: mpsc::Receiver<Message>,
    /// Resolves once the broadcaster no longer holds the session
    pub removed: oneshot::Receiver<()>,
}

impl Session {
    /// Create a session with a buffer of fixed `capacity` (at least 1)
    pub fn new(identifier: impl Into<String>, capacity: usize) -> (Self, SessionHandle) {
        let identifier = identifier.into();
        let address = host_of(&identifier);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (removed_tx, removed_rx) = oneshot::channel();
        let id = Uuid::new_v4().to_string();

        let session = Self {
            id: id.clone(),
            display_name: identifier.clone(),
            role: Role::User,
            address,
            identifier,
            outbound: tx,
            _removed: removed_tx,
        };

        let handle = SessionHandle {
            id,
            outbound: rx,
            removed: removed_rx,
        };
        (session, handle)
    }

    /// Try to enqueue without waiting
    pub fn offer(&self, message: Message) -> Delivery {
        match self.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Strip the port from `ip:port` / `[v6]:port`, mapping `::1` to loopback v4
fn host_of(identifier: &str) -> String {
    let host = match identifier.parse::<std::net::SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => identifier.to_string(),
    };
    if host == "::1" {
        "127.0.0.1".to_string()
    } else {
        host
    }
}
