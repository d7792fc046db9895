use crate::protocol::Reply;
use crate::storage::StorageError;
use thiserror::Error;

/// Reasons a command can fail. Each renders as the text of an Error reply.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR no such key")]
    NotFound,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR {0}")]
    InvalidArgument(String),

    #[error("ERR invalid request, expected a non-empty array of bulk strings")]
    InvalidRequest,

    #[error("ERR storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl CommandError {
    pub fn wrong_arity(name: &str) -> Self {
        CommandError::WrongArity(name.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        CommandError::InvalidArgument(msg.into())
    }

    /// True for failures reported by the storage engine.
    pub fn is_backend(&self) -> bool {
        matches!(self, CommandError::Storage(_))
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err.to_string())
    }
}

pub type CommandResult = Result<Reply, CommandError>;
