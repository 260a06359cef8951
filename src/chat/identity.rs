// Per-process origin tag for filtering our own broadcast echo

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the origin tag in hex characters
pub const ORIGIN_TAG_LEN: usize = 8;

/// Identifies this process on the broadcast channel.
///
/// Only used to recognise our own frames when the medium echoes them back;
/// it carries no authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    origin_tag: String,
}

impl Identity {
    /// Derive a fresh tag from the clock, pid, host name and random bytes
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_default();

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(host.as_bytes());
        hasher.update(salt);

        let digest = hasher.finalize();
        let mut origin_tag = hex::encode(&digest[..ORIGIN_TAG_LEN / 2]);
        origin_tag.truncate(ORIGIN_TAG_LEN);

        Self { origin_tag }
    }

    /// Use a fixed tag (tests, or a tag pinned in config)
    pub fn from_tag(tag: impl Into<String>) -> Self {
        Self {
            origin_tag: tag.into(),
        }
    }

    pub fn origin_tag(&self) -> &str {
        &self.origin_tag
    }

    /// Whether a frame's origin is us
    pub fn is_self(&self, origin: &str) -> bool {
        self.origin_tag == origin
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin_tag)
    }
}
