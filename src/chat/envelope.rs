// Colon-delimited frames for the LAN broadcast channel
//
//   CHAT:<origin>:<text>
//   SYS:<origin>:<text>
//   ADMIN:<origin>:<ACTION>:<value>:<issuer>
//
// Fields are not escaped, so a `:` inside an ADMIN value or issuer splits it;
// senders reject such values with `check_field` before anything is applied.

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::moderation::{Action, ModerationCommand};

/// Largest datagram we will read off the socket
pub const MAX_DATAGRAM: usize = 65_507;

/// Field separator on the wire
pub const SEPARATOR: char = ':';

/// Refuse a value that would not survive as a single ADMIN field
pub fn check_field(value: &str) -> ChatResult<()> {
    if value.contains(SEPARATOR) {
        return Err(ChatError::SeparatorInField(value.to_string()));
    }
    Ok(())
}

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Chat,
    System,
    AdminCmd,
}

impl EnvelopeKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            EnvelopeKind::Chat => "CHAT",
            EnvelopeKind::System => "SYS",
            EnvelopeKind::AdminCmd => "ADMIN",
        }
    }

    fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            // MSG is what older peers send for chat
            "CHAT" | "MSG" => Some(EnvelopeKind::Chat),
            "SYS" => Some(EnvelopeKind::System),
            "ADMIN" => Some(EnvelopeKind::AdminCmd),
            _ => None,
        }
    }
}

/// Frame contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Command(ModerationCommand),
}

/// A frame on the broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Origin tag of the sending process
    pub origin: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn chat(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Chat,
            origin: origin.into(),
            payload: Payload::Text(text.into()),
        }
    }

    pub fn system(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::System,
            origin: origin.into(),
            payload: Payload::Text(text.into()),
        }
    }

    pub fn admin(origin: impl Into<String>, command: ModerationCommand) -> Self {
        Self {
            kind: EnvelopeKind::AdminCmd,
            origin: origin.into(),
            payload: Payload::Command(command),
        }
    }

    /// Render the wire text
    pub fn encode(&self) -> String {
        let tag = self.kind.as_wire();
        match &self.payload {
            Payload::Text(text) => format!("{}:{}:{}", tag, self.origin, text),
            Payload::Command(cmd) => format!(
                "{}:{}:{}:{}:{}",
                tag,
                self.origin,
                cmd.action.as_wire(),
                cmd.target,
                cmd.issuer
            ),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Parse a datagram.
    ///
    /// Anything that does not fit a known shape is `MalformedFrame`; callers on
    /// the shared channel drop those without telling anyone. Extra trailing
    /// fields on ADMIN frames are ignored.
    pub fn decode(bytes: &[u8]) -> ChatResult<Self> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|_| ChatError::MalformedFrame("not utf-8".to_string()))?;
        let raw = raw.trim_end_matches(&['\r', '\n'][..]);

        let mut parts = raw.splitn(3, ':');
        let (tag, origin, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(tag), Some(origin), Some(rest)) => (tag, origin, rest),
            _ => return Err(ChatError::MalformedFrame("too few fields".to_string())),
        };

        if origin.is_empty() {
            return Err(ChatError::MalformedFrame("empty origin".to_string()));
        }

        let kind = EnvelopeKind::from_wire(tag)
            .ok_or_else(|| ChatError::MalformedFrame(format!("unknown type {}", tag)))?;

        let payload = match kind {
            EnvelopeKind::Chat | EnvelopeKind::System => Payload::Text(rest.to_string()),
            EnvelopeKind::AdminCmd => Payload::Command(decode_command(rest)?),
        };

        Ok(Self {
            kind,
            origin: origin.to_string(),
            payload,
        })
    }
}

fn decode_command(rest: &str) -> ChatResult<ModerationCommand> {
    let mut fields = rest.split(':');
    let (action, target, issuer) = match (fields.next(), fields.next(), fields.next()) {
        (Some(action), Some(target), Some(issuer)) => (action, target, issuer),
        _ => return Err(ChatError::MalformedFrame("short ADMIN frame".to_string())),
    };

    if target.is_empty() || issuer.is_empty() {
        return Err(ChatError::MalformedFrame("empty ADMIN field".to_string()));
    }

    let action = action
        .parse::<Action>()
        .map_err(|e| ChatError::MalformedFrame(e.to_string()))?;

    Ok(ModerationCommand::new(action, target, issuer))
}
