// Slash-command grammar shared by the server and the LAN peer

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::moderation::Action;

/// A line of user input, parsed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/nick <name>`
    Nick(String),
    /// `/admin <password>`
    Admin(String),
    /// `/system <password>`
    System(String),
    /// `/ban <ip>`
    Ban(String),
    /// `/unban <ip>`
    Unban(String),
    /// `/op <name>`
    Grant(String),
    /// `/deop <name>`
    Revoke(String),
    /// `/send`
    Send,
    /// Anything without a leading `/`
    Chat(String),
    /// A `/word` nobody handles
    Unknown(String),
}

impl Command {
    /// Parse one line of input.
    ///
    /// Fails only when a known command is missing its argument.
    pub fn parse(line: &str) -> ChatResult<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('/') {
            return Ok(Command::Chat(line.to_string()));
        }

        let (name, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (trimmed, ""),
        };

        let command = match name {
            "/nick" => Command::Nick(
                required("/nick", rest)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            "/admin" => Command::Admin(first_word("/admin", rest)?),
            "/system" => Command::System(first_word("/system", rest)?),
            "/ban" => Command::Ban(required("/ban", rest)?),
            "/unban" => Command::Unban(required("/unban", rest)?),
            "/op" => Command::Grant(required("/op", rest)?),
            "/deop" => Command::Revoke(required("/deop", rest)?),
            "/send" => Command::Send,
            other => Command::Unknown(other.to_string()),
        };

        Ok(command)
    }

    /// The moderation action this command maps to, if any
    pub fn moderation(&self) -> Option<(Action, &str)> {
        match self {
            Command::Ban(target) => Some((Action::Ban, target)),
            Command::Unban(target) => Some((Action::Unban, target)),
            Command::Grant(target) => Some((Action::GrantAdmin, target)),
            Command::Revoke(target) => Some((Action::RevokeAdmin, target)),
            _ => None,
        }
    }
}

fn required(command: &'static str, rest: &str) -> ChatResult<String> {
    if rest.is_empty() {
        Err(ChatError::MissingArgument(command))
    } else {
        Ok(rest.to_string())
    }
}

fn first_word(command: &'static str, rest: &str) -> ChatResult<String> {
    rest.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(ChatError::MissingArgument(command))
}
