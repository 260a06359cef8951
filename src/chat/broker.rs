// Single-owner broadcaster: session registry, fan-out and in-room commands

use crate::chat::command::Command;
use crate::chat::config::ServerConfig;
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::message::{ClientFrame, Message, Role};
use crate::chat::moderation::{Action, ModerationCommand, ModerationState};
use crate::chat::session::{Delivery, Session};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Handle for talking to the broadcaster task
#[derive(Clone)]
pub struct BroadcasterHandle {
    tx: mpsc::UnboundedSender<BroadcasterCommand>,
}

impl BroadcasterHandle {
    pub fn new(tx: mpsc::UnboundedSender<BroadcasterCommand>) -> Self {
        Self { tx }
    }

    /// Send a command to the broadcaster
    pub fn send_command(&self, cmd: BroadcasterCommand) -> ChatResult<()> {
        self.tx.send(cmd).map_err(|_| ChatError::BroadcasterGone)
    }

    /// Make a session a fan-out target for every later broadcast
    pub fn register(&self, session: Session) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::Register { session })
    }

    /// Register unless the session's address is banned.
    ///
    /// Returns `false` (and drops the session) when it is banned.
    pub async fn admit(&self, session: Session) -> ChatResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send_command(BroadcasterCommand::Admit { session, reply })?;
        rx.await.map_err(|_| ChatError::BroadcasterGone)
    }

    /// Remove a session and close its buffer. No-op if absent.
    pub fn unregister(&self, session_id: &str) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::Unregister {
            session_id: session_id.to_string(),
            announce: false,
        })
    }

    /// Like `unregister`, but tells the room the session left
    pub fn depart(&self, session_id: &str) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::Unregister {
            session_id: session_id.to_string(),
            announce: true,
        })
    }

    /// Fan a message out to every registered session
    pub fn broadcast(&self, message: Message) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::Broadcast { message })
    }

    /// Deliver to a single session
    pub fn send_to(&self, session_id: &str, message: Message) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::SendTo {
            session_id: session_id.to_string(),
            message,
        })
    }

    /// Change a session's role and notify only that session
    pub fn update_role(&self, session_id: &str, role: Role) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::UpdateRole {
            session_id: session_id.to_string(),
            role,
        })
    }

    /// Hand a line of client input to the broadcaster for parsing
    pub fn session_input(&self, session_id: &str, frame: ClientFrame) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::Input {
            session_id: session_id.to_string(),
            frame,
        })
    }

    /// Snapshot of the registry
    pub async fn members(&self) -> ChatResult<Vec<Member>> {
        let (reply, rx) = oneshot::channel();
        self.send_command(BroadcasterCommand::Members { reply })?;
        rx.await.map_err(|_| ChatError::BroadcasterGone)
    }

    /// Snapshot of the server's moderation state
    pub async fn moderation(&self) -> ChatResult<ModerationState> {
        let (reply, rx) = oneshot::channel();
        self.send_command(BroadcasterCommand::Moderation { reply })?;
        rx.await.map_err(|_| ChatError::BroadcasterGone)
    }

    /// Stop the broadcaster, closing every session buffer
    pub fn shutdown(&self) -> ChatResult<()> {
        self.send_command(BroadcasterCommand::Shutdown)
    }
}

/// Commands processed one at a time by the broadcaster
#[derive(Debug)]
pub enum BroadcasterCommand {
    Register {
        session: Session,
    },
    Admit {
        session: Session,
        reply: oneshot::Sender<bool>,
    },
    Unregister {
        session_id: String,
        announce: bool,
    },
    Broadcast {
        message: Message,
    },
    SendTo {
        session_id: String,
        message: Message,
    },
    UpdateRole {
        session_id: String,
        role: Role,
    },
    /// A line the session typed
    Input {
        session_id: String,
        frame: ClientFrame,
    },
    Members {
        reply: oneshot::Sender<Vec<Member>>,
    },
    Moderation {
        reply: oneshot::Sender<ModerationState>,
    },
    Shutdown,
}

/// Registry entry as reported by `members()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    pub address: String,
}

/// Owns the session registry and the server's moderation state.
///
/// Nothing else touches either; all access goes through `BroadcasterHandle`.
pub struct Broadcaster {
    sessions: HashMap<String, Session>,
    moderation: ModerationState,
    config: ServerConfig,
    rx: mpsc::UnboundedReceiver<BroadcasterCommand>,
}

impl Broadcaster {
    /// Create a new broadcaster
    pub fn new(config: ServerConfig, moderation: ModerationState) -> (Self, BroadcasterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let broadcaster = Self {
            sessions: HashMap::new(),
            moderation,
            config,
            rx,
        };

        (broadcaster, BroadcasterHandle::new(tx))
    }

    /// Create and spawn onto the current runtime
    pub fn spawn(config: ServerConfig, moderation: ModerationState) -> BroadcasterHandle {
        let (broadcaster, handle) = Self::new(config, moderation);
        tokio::spawn(async move {
            broadcaster.run().await;
        });
        handle
    }

    /// Run the broadcaster event loop
    pub async fn run(mut self) {
        tracing::info!("Broadcaster started");

        while let Some(cmd) = self.rx.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        // Dropping the sessions closes every outbound buffer
        let remaining = self.sessions.len();
        self.sessions.clear();
        tracing::info!("Broadcaster stopped ({} sessions closed)", remaining);
    }

    /// Process one command. Returns `false` on shutdown.
    fn handle_command(&mut self, cmd: BroadcasterCommand) -> bool {
        match cmd {
            BroadcasterCommand::Register { session } => self.register(session),
            BroadcasterCommand::Admit { session, reply } => {
                let admitted = if self.moderation.is_banned(&session.address) {
                    tracing::info!("Refusing banned address {}", session.address);
                    false
                } else {
                    self.register(session);
                    true
                };
                let _ = reply.send(admitted);
            }
            BroadcasterCommand::Unregister {
                session_id,
                announce,
            } => {
                if let Some(session) = self.sessions.remove(&session_id) {
                    tracing::info!("Session {} ({}) unregistered", session_id, session.display_name);
                    if announce && self.config.announce_presence {
                        self.fan_out(&Message::system(format!("{} left", session.display_name)));
                    }
                }
            }
            BroadcasterCommand::Broadcast { message } => self.fan_out(&message),
            BroadcasterCommand::SendTo {
                session_id,
                message,
            } => {
                self.deliver(&session_id, message);
            }
            BroadcasterCommand::UpdateRole { session_id, role } => {
                self.set_role(&session_id, role);
            }
            BroadcasterCommand::Input { session_id, frame } => {
                self.handle_input(&session_id, frame);
            }
            BroadcasterCommand::Members { reply } => {
                let members = self
                    .sessions
                    .values()
                    .map(|s| Member {
                        id: s.id.clone(),
                        display_name: s.display_name.clone(),
                        role: s.role,
                        address: s.address.clone(),
                    })
                    .collect();
                let _ = reply.send(members);
            }
            BroadcasterCommand::Moderation { reply } => {
                let _ = reply.send(self.moderation.clone());
            }
            BroadcasterCommand::Shutdown => {
                tracing::info!("Broadcaster shutting down");
                return false;
            }
        }

        true
    }

    fn register(&mut self, session: Session) {
        if self.sessions.contains_key(&session.id) {
            tracing::warn!("Session {} is already registered", session.id);
            return;
        }
        tracing::info!("Session {} registered from {}", session.id, session.identifier);
        self.sessions.insert(session.id.clone(), session);
    }

    /// Non-blocking enqueue to every session; full or closed buffers are evicted
    fn fan_out(&mut self, message: &Message) {
        let mut dropped = Vec::new();

        for (id, session) in self.sessions.iter() {
            match session.offer(message.clone()) {
                Delivery::Queued => {}
                Delivery::Full => dropped.push((id.clone(), "outbound buffer full")),
                Delivery::Closed => dropped.push((id.clone(), "writer closed")),
            }
        }

        for (id, reason) in dropped {
            self.evict(&id, reason);
        }
    }

    /// Enqueue to one session with the same eviction policy
    fn deliver(&mut self, session_id: &str, message: Message) -> bool {
        let outcome = match self.sessions.get(session_id) {
            Some(session) => session.offer(message),
            None => return false,
        };

        match outcome {
            Delivery::Queued => true,
            Delivery::Full => {
                self.evict(session_id, "outbound buffer full");
                false
            }
            Delivery::Closed => {
                self.evict(session_id, "writer closed");
                false
            }
        }
    }

    fn evict(&mut self, session_id: &str, reason: &str) {
        if let Some(session) = self.sessions.remove(session_id) {
            tracing::warn!(
                "Evicted session {} ({}): {}",
                session_id,
                session.display_name,
                reason
            );
        }
    }

    fn notify(&mut self, session_id: &str, text: impl Into<String>) {
        self.deliver(session_id, Message::system(text));
    }

    fn set_role(&mut self, session_id: &str, role: Role) {
        match self.sessions.get_mut(session_id) {
            Some(session) => session.role = role,
            None => return,
        }
        tracing::info!("Session {} is now {}", session_id, role);
        self.deliver(session_id, Message::role_update(role));
    }

    /// Parse and act on one line of client input
    fn handle_input(&mut self, session_id: &str, frame: ClientFrame) {
        if let Some(name) = frame.name.as_deref().map(str::trim) {
            if !name.is_empty() {
                self.rename(session_id, name);
            }
        }

        let (identifier, name, role) = match self.sessions.get(session_id) {
            Some(session) => (
                session.identifier.clone(),
                session.display_name.clone(),
                session.role,
            ),
            None => {
                tracing::debug!("Input from unknown session {}", session_id);
                return;
            }
        };

        if frame.content.trim().is_empty() {
            return;
        }

        let command = match Command::parse(&frame.content) {
            Ok(command) => command,
            Err(e) => {
                self.notify(session_id, e.to_string());
                return;
            }
        };

        match command {
            Command::Chat(text) => {
                self.fan_out(&Message::chat(identifier, name, role, text));
            }
            Command::Nick(new_name) => {
                self.rename(session_id, &new_name);
                self.notify(session_id, format!("{} is now known as {}", name, new_name));
            }
            Command::Admin(password) => {
                if role == Role::SuperAdmin {
                    self.notify(session_id, "You already hold system privileges");
                } else if password_matches(&self.config.admin_password, &password) {
                    self.moderation
                        .apply(&ModerationCommand::new(Action::GrantAdmin, name.as_str(), "password"));
                    self.notify(session_id, "Admin authentication succeeded");
                    self.set_role(session_id, Role::Admin);
                } else {
                    self.notify(session_id, "Admin authentication failed: wrong password");
                }
            }
            Command::System(password) => {
                if password_matches(&self.config.system_password, &password) {
                    self.moderation
                        .apply(&ModerationCommand::new(Action::GrantAdmin, name.as_str(), "password"));
                    self.notify(session_id, "System authentication succeeded");
                    self.set_role(session_id, Role::SuperAdmin);
                } else {
                    self.notify(session_id, "System authentication failed: wrong password");
                }
            }
            Command::Ban(_) | Command::Unban(_) | Command::Grant(_) | Command::Revoke(_) => {
                if let Some((action, target)) = command.moderation() {
                    self.moderate(session_id, &name, role, action, target);
                }
            }
            Command::Send => {
                self.notify(session_id, "File sharing is not available on this server");
            }
            Command::Unknown(name) => {
                self.notify(session_id, format!("Unknown command: {}", name));
            }
        }
    }

    /// Change a display name, carrying a privileged session's admin-set entry along
    fn rename(&mut self, session_id: &str, new_name: &str) {
        let session = match self.sessions.get_mut(session_id) {
            Some(session) => session,
            None => return,
        };
        if session.display_name == new_name {
            return;
        }
        let old_name = std::mem::replace(&mut session.display_name, new_name.to_string());

        if session.role >= Role::Admin && self.moderation.is_admin(&old_name) {
            self.moderation
                .apply(&ModerationCommand::new(Action::RevokeAdmin, old_name.as_str(), "rename"));
            self.moderation
                .apply(&ModerationCommand::new(Action::GrantAdmin, new_name, "rename"));
        }
    }

    // Session roles gate commands on the server. The admin set mirrors who holds
    // them, so `/op` and `/deop` can target a name and the snapshot stays truthful.
    fn moderate(&mut self, session_id: &str, issuer: &str, role: Role, action: Action, target: &str) {
        let required = match action {
            Action::Ban | Action::Unban => Role::Admin,
            Action::GrantAdmin | Action::RevokeAdmin => Role::SuperAdmin,
        };
        if role < required {
            self.notify(
                session_id,
                format!("Permission denied: {} requires {}", action, required),
            );
            return;
        }

        let command = ModerationCommand::new(action, target, issuer);
        let changed = self.moderation.apply(&command);
        tracing::info!("{} {} by {} (changed: {})", action, target, issuer, changed);

        match action {
            Action::Ban => self.evict_banned(),
            Action::GrantAdmin => self.retarget_roles(target, Role::User, Role::Admin),
            Action::RevokeAdmin => self.retarget_roles(target, Role::Admin, Role::User),
            Action::Unban => {}
        }

        let status = if changed { "applied" } else { "already in effect" };
        self.notify(session_id, format!("{} {}: {}", action, target, status));
    }

    /// Disconnect every session whose address is now banned
    fn evict_banned(&mut self) {
        let banned: Vec<String> = self
            .sessions
            .values()
            .filter(|s| self.moderation.is_banned(&s.address))
            .map(|s| s.id.clone())
            .collect();

        for id in banned {
            if let Some(session) = self.sessions.get(&id) {
                let _ = session.offer(Message::system("You have been banned"));
            }
            self.evict(&id, "address banned");
        }
    }

    /// Move every session named `name` from role `from` to role `to`
    fn retarget_roles(&mut self, name: &str, from: Role, to: Role) {
        let ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.display_name == name && s.role == from)
            .map(|s| s.id.clone())
            .collect();

        for id in ids {
            self.set_role(&id, to);
        }
    }
}

fn password_matches(expected: &Option<String>, given: &str) -> bool {
    matches!(expected, Some(p) if !p.is_empty() && p == given)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::MessageKind;

    fn quiet_config() -> ServerConfig {
        ServerConfig {
            admin_password: Some("adminpw".to_string()),
            system_password: Some("rootpw".to_string()),
            announce_presence: false,
            ..ServerConfig::default()
        }
    }

    fn input(text: &str) -> ClientFrame {
        ClientFrame::parse(text)
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_including_sender() {
        let handle = Broadcaster::spawn(quiet_config(), ModerationState::new());
        let (a, mut a_rx) = Session::new("10.0.0.1:1000", 8);
        let (b, mut b_rx) = Session::new("10.0.0.2:1000", 8);
        let a_id = a.id.clone();
        handle.register(a).unwrap();
        handle.register(b).unwrap();

        handle.session_input(&a_id, input(r#"{"content":"hi","name":"alice"}"#)).unwrap();
        handle.members().await.unwrap();

        let got_a = a_rx.outbound.try_recv().unwrap();
        let got_b = b_rx.outbound.try_recv().unwrap();
        assert_eq!(got_a, got_b);
        assert_eq!(got_b.kind, MessageKind::Chat);
        assert_eq!(got_b.sender_name, "alice");
        assert_eq!(got_b.sender_id, "10.0.0.1:1000");
        assert_eq!(got_b.body, "hi");
    }

    #[tokio::test]
    async fn test_admin_password_promotes() {
        let handle = Broadcaster::spawn(quiet_config(), ModerationState::new());
        let (a, mut a_rx) = Session::new("10.0.0.1:1000", 8);
        let a_id = a.id.clone();
        handle.register(a).unwrap();

        handle.session_input(&a_id, input("/admin wrong")).unwrap();
        handle.session_input(&a_id, input("/admin adminpw")).unwrap();
        let members = handle.members().await.unwrap();
        assert_eq!(members[0].role, Role::Admin);

        let failed = a_rx.outbound.try_recv().unwrap();
        assert!(failed.body.contains("wrong password"));
        let ok = a_rx.outbound.try_recv().unwrap();
        assert_eq!(ok.kind, MessageKind::System);
        let update = a_rx.outbound.try_recv().unwrap();
        assert_eq!(update.kind, MessageKind::RoleUpdate);
        assert_eq!(update.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_unset_password_never_matches() {
        let handle = Broadcaster::spawn(
            ServerConfig {
                announce_presence: false,
                ..ServerConfig::default()
            },
            ModerationState::new(),
        );
        let (a, _a_rx) = Session::new("10.0.0.1:1000", 8);
        let a_id = a.id.clone();
        handle.register(a).unwrap();

        handle.session_input(&a_id, input("/system anything")).unwrap();
        let members = handle.members().await.unwrap();
        assert_eq!(members[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_ban_requires_admin_and_evicts_target() {
        let handle = Broadcaster::spawn(quiet_config(), ModerationState::new());
        let (mod_session, mut mod_rx) = Session::new("10.0.0.1:1000", 8);
        let (victim, mut victim_rx) = Session::new("10.0.0.66:1000", 8);
        let mod_id = mod_session.id.clone();
        handle.register(mod_session).unwrap();
        handle.register(victim).unwrap();

        handle.session_input(&mod_id, input("/ban 10.0.0.66")).unwrap();
        assert_eq!(handle.members().await.unwrap().len(), 2);
        let denied = mod_rx.outbound.try_recv().unwrap();
        assert!(denied.body.starts_with("Permission denied"));

        handle.session_input(&mod_id, input("/admin adminpw")).unwrap();
        handle.session_input(&mod_id, input("/ban 10.0.0.66")).unwrap();

        let members = handle.members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, mod_id);
        assert!(handle.moderation().await.unwrap().is_banned("10.0.0.66"));

        assert_eq!(victim_rx.outbound.recv().await.unwrap().body, "You have been banned");
        assert!(victim_rx.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_op_hot_updates_named_session() {
        let handle = Broadcaster::spawn(quiet_config(), ModerationState::new());
        let (root, _root_rx) = Session::new("10.0.0.1:1000", 8);
        let (bob, mut bob_rx) = Session::new("10.0.0.2:1000", 8);
        let root_id = root.id.clone();
        let bob_id = bob.id.clone();
        handle.register(root).unwrap();
        handle.register(bob).unwrap();

        handle.session_input(&bob_id, input("/nick bob")).unwrap();
        handle.session_input(&root_id, input("/op bob")).unwrap();
        // Plain admins cannot grant; nothing changed yet
        let bob_role = |members: Vec<Member>| members.into_iter().find(|m| m.id == bob_id).unwrap().role;
        assert_eq!(bob_role(handle.members().await.unwrap()), Role::User);

        handle.session_input(&root_id, input("/system rootpw")).unwrap();
        handle.session_input(&root_id, input("/op bob")).unwrap();
        assert_eq!(bob_role(handle.members().await.unwrap()), Role::Admin);
        assert!(handle.moderation().await.unwrap().is_admin("bob"));

        let renamed = bob_rx.outbound.try_recv().unwrap();
        assert!(renamed.body.contains("now known as bob"));
        let update = bob_rx.outbound.try_recv().unwrap();
        assert_eq!(update.kind, MessageKind::RoleUpdate);

        handle.session_input(&root_id, input("/deop bob")).unwrap();
        assert_eq!(bob_role(handle.members().await.unwrap()), Role::User);
    }

    #[tokio::test]
    async fn test_admin_set_follows_rename() {
        let handle = Broadcaster::spawn(quiet_config(), ModerationState::new());
        let (a, _a_rx) = Session::new("10.0.0.1:1000", 16);
        let (victim, _victim_rx) = Session::new("10.0.0.77:1000", 16);
        let a_id = a.id.clone();
        handle.register(a).unwrap();
        handle.register(victim).unwrap();

        handle.session_input(&a_id, input("/nick alice")).unwrap();
        handle.session_input(&a_id, input("/admin adminpw")).unwrap();
        assert!(handle.moderation().await.unwrap().is_admin("alice"));

        handle.session_input(&a_id, input("/nick queen")).unwrap();
        let moderation = handle.moderation().await.unwrap();
        assert!(moderation.is_admin("queen"));
        assert!(!moderation.is_admin("alice"));

        // Still privileged under the new name
        handle.session_input(&a_id, input("/ban 10.0.0.77")).unwrap();
        let members = handle.members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].display_name, "queen");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_commands() {
        let handle = Broadcaster::spawn(quiet_config(), ModerationState::new());
        let (a, mut a_rx) = Session::new("10.0.0.1:1000", 8);
        let a_id = a.id.clone();
        handle.register(a).unwrap();

        handle.session_input(&a_id, input("/dance")).unwrap();
        handle.session_input(&a_id, input("/ban")).unwrap();
        handle.session_input(&a_id, input("   ")).unwrap();
        handle.members().await.unwrap();

        assert_eq!(a_rx.outbound.try_recv().unwrap().body, "Unknown command: /dance");
        assert!(a_rx.outbound.try_recv().unwrap().body.contains("/ban"));
        assert!(a_rx.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admit_refuses_banned_address() {
        let mut moderation = ModerationState::new();
        moderation.apply(&ModerationCommand::new(Action::Ban, "10.9.0.0/16", "air"));
        let handle = Broadcaster::spawn(quiet_config(), moderation);

        let (banned, mut banned_rx) = Session::new("10.9.3.3:1000", 8);
        let (fine, _fine_rx) = Session::new("10.8.3.3:1000", 8);

        assert!(!handle.admit(banned).await.unwrap());
        assert!(handle.admit(fine).await.unwrap());
        assert_eq!(handle.members().await.unwrap().len(), 1);
        assert!(banned_rx.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_buffers() {
        let (broadcaster, handle) = Broadcaster::new(quiet_config(), ModerationState::new());
        let task = tokio::spawn(broadcaster.run());

        let (a, mut a_rx) = Session::new("10.0.0.1:1000", 8);
        handle.register(a).unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        assert!(a_rx.outbound.recv().await.is_none());
        assert!(matches!(handle.members().await, Err(ChatError::BroadcasterGone)));
    }
}
