// Moderation replication over an unreliable broadcast channel
//
// Every peer keeps its own ModerationState. Remote ADMIN frames are honoured
// only when the issuer is an admin in *this* peer's roster, so peers that
// missed a grant keep rejecting that admin's commands. Nothing is retried.

use crate::chat::envelope::{check_field, Envelope, EnvelopeKind, Payload};
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::identity::Identity;
use crate::chat::moderation::{Action, ModerationCommand, ModerationState};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What the receive path did with a datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Chat or system text for the local user
    Display(String),
    /// Remote command honoured; `changed` is false for a repeat
    Applied {
        command: ModerationCommand,
        changed: bool,
    },
    /// Issuer is not an admin here; dropped
    Unauthorized(ModerationCommand),
    /// Our own frame echoed back
    OwnEcho,
    /// Did not decode
    Noise,
}

impl Inbound {
    /// Line to show the user, if any
    pub fn render(&self) -> Option<String> {
        match self {
            Inbound::Display(text) => Some(text.clone()),
            Inbound::Applied { command, .. } => Some(describe(command)),
            Inbound::Unauthorized(_) | Inbound::OwnEcho | Inbound::Noise => None,
        }
    }
}

/// Human-readable summary of an honoured command
pub fn describe(command: &ModerationCommand) -> String {
    match command.action {
        Action::Ban => format!("[System] admin {} banned IP {}", command.issuer, command.target),
        Action::Unban => format!("[System] admin {} unbanned IP {}", command.issuer, command.target),
        Action::GrantAdmin => format!("[System] {} is now an admin", command.target),
        Action::RevokeAdmin => format!("[System] {} is no longer an admin", command.target),
    }
}

/// Applies and originates moderation commands for one peer
pub struct Replicator {
    identity: Identity,
    name: String,
    state: Arc<RwLock<ModerationState>>,
}

impl Replicator {
    pub fn new(identity: Identity, name: impl Into<String>, state: ModerationState) -> Self {
        Self {
            identity,
            name: name.into(),
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle on the local moderation state
    pub fn state(&self) -> Arc<RwLock<ModerationState>> {
        self.state.clone()
    }

    pub async fn is_banned(&self, ip: &str) -> bool {
        self.state.read().await.is_banned(ip)
    }

    pub async fn is_admin(&self, name: &str) -> bool {
        self.state.read().await.is_admin(name)
    }

    /// Receive path: decode, drop our own echo, then display or apply
    pub async fn receive(&self, datagram: &[u8]) -> Inbound {
        let envelope = match Envelope::decode(datagram) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Dropping frame: {}", e);
                return Inbound::Noise;
            }
        };

        if self.identity.is_self(&envelope.origin) {
            return Inbound::OwnEcho;
        }

        match (envelope.kind, envelope.payload) {
            (EnvelopeKind::Chat, Payload::Text(text)) | (EnvelopeKind::System, Payload::Text(text)) => {
                Inbound::Display(text)
            }
            (EnvelopeKind::AdminCmd, Payload::Command(command)) => {
                let mut state = self.state.write().await;
                match state.apply_authorized(&command) {
                    Ok(changed) => {
                        tracing::info!(
                            "Applied {} {} from {} (changed: {})",
                            command.action,
                            command.target,
                            command.issuer,
                            changed
                        );
                        Inbound::Applied { command, changed }
                    }
                    Err(_) => {
                        tracing::debug!(
                            "Ignoring {} from non-admin {}",
                            command.action,
                            command.issuer
                        );
                        Inbound::Unauthorized(command)
                    }
                }
            }
            _ => Inbound::Noise,
        }
    }

    /// Send path for a local moderation action.
    ///
    /// Applies to local state first, then returns the frame to transmit once.
    /// Fails with `NotAuthorized` before touching anything if this peer's
    /// user is not a local admin, and with `SeparatorInField` if the target or
    /// our name could not be framed.
    pub async fn issue(&self, action: Action, target: &str) -> ChatResult<Envelope> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ChatError::MissingArgument("target"));
        }
        check_field(target)?;
        check_field(&self.name)?;

        let command = ModerationCommand::new(action, target, self.name.as_str());
        {
            let mut state = self.state.write().await;
            state.apply_authorized(&command)?;
        }

        Ok(Envelope::admin(self.identity.origin_tag(), command))
    }

    /// Frame for a line of chat, already formatted for display
    pub fn chat(&self, text: &str) -> Envelope {
        Envelope::chat(self.identity.origin_tag(), self.chat_line(text))
    }

    /// How our own chat line is shown locally and to peers
    pub fn chat_line(&self, text: &str) -> String {
        format!("[{}]: {}", self.name, text)
    }

    /// Frame announcing that we joined
    pub fn announce_join(&self) -> Envelope {
        Envelope::system(
            self.identity.origin_tag(),
            format!("{} joined the room", self.name),
        )
    }
}
