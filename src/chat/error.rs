//! Chat error types.

use thiserror::Error;

/// Errors surfaced by the chat core.
///
/// Protocol faults on the shared broadcast channel are reported through
/// [`ChatError::MalformedFrame`] but are expected to be discarded by callers,
/// never shown to a user.
#[derive(Error, Debug)]
pub enum ChatError {
    /// A wire frame did not match any known shape.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A moderation action name was not recognised.
    #[error("Unknown moderation action: {0}")]
    UnknownAction(String),

    /// The acting principal is not in the local admin set.
    #[error("{0} is not an administrator")]
    NotAuthorized(String),

    /// A value would split an ADMIN frame because it contains the field separator.
    #[error("'{0}' cannot contain ':'")]
    SeparatorInField(String),

    /// A command was missing its argument.
    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),

    /// The broadcaster task has stopped.
    #[error("Broadcaster is no longer running")]
    BroadcasterGone,
}

pub type ChatResult<T> = Result<T, ChatError>;
