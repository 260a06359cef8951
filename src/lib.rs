//! airchat - LAN chat with a central broadcaster or serverless UDP peers
//!
//! The `chat` module holds both the server-side session broadcaster and the
//! peer-to-peer moderation replicator.

pub mod chat;

pub use chat::{ChatServer, LanPeer};
