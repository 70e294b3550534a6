//! Error type for command execution.

use thiserror::Error;

/// Why a command did not produce a successful reply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The server could not be reached or dropped the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with `ok: 0`.
    #[error("server error {code} ({code_name}): {message}")]
    Server {
        code: i32,
        code_name: String,
        message: String,
    },
}

impl CommandError {
    pub fn server(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }

    /// Server error code, if the server answered.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Server { code, .. } => Some(*code),
            Self::Transport(_) => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
