// LAN chat core
//
// Two shapes of the same fan-out problem: a single-owner broadcaster behind a
// TCP server, and a serverless peer that replicates moderation state over UDP
// broadcast.

pub mod error;
pub mod message;
pub mod command;
pub mod config;
pub mod session;
pub mod broker;
pub mod server;
pub mod moderation;
pub mod identity;
pub mod envelope;
pub mod replicator;
pub mod peer;
pub mod cli;

pub use error::{ChatError, ChatResult};
pub use message::{ClientFrame, Message, MessageKind, Role};
pub use command::Command;
pub use config::{PeerConfig, ServerConfig};
pub use session::{Delivery, Session, SessionHandle};
pub use broker::{Broadcaster, BroadcasterCommand, BroadcasterHandle, Member};
pub use server::{ChatServer, SessionGateway};
pub use moderation::{Action, BanEntry, BanPattern, ModerationCommand, ModerationState};
pub use identity::Identity;
pub use envelope::{Envelope, EnvelopeKind, Payload};
pub use replicator::{Inbound, Replicator};
pub use peer::LanPeer;
pub use cli::{ChatCli, ChatCommand};
