// Debugger error types
//
// Only disconnects and queue shutdown end a session; everything else is scoped
// to the command that produced it.

use jdwp_client::protocol::error_codes;
use jdwp_client::JdwpError;
use thiserror::Error;

pub type DebuggerResult<T> = Result<T, DebuggerError>;

#[derive(Debug, Clone, Error)]
pub enum DebuggerError {
    #[error("Debuggee connection lost")]
    ProtocolDisconnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Class not loaded: {0}")]
    ClassNotLoaded(String),

    #[error("Command cancelled")]
    Cancelled,

    #[error("Step filter resolution failed: {0}")]
    FilterResolution(String),

    #[error("VM error {code}: {message}")]
    Vm { code: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DebuggerError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        DebuggerError::InvalidState(message.into())
    }

    /// True for errors after which no further command can reach the debuggee
    pub fn is_fatal(&self) -> bool {
        matches!(self, DebuggerError::ProtocolDisconnected)
    }
}

impl From<JdwpError> for DebuggerError {
    fn from(err: JdwpError) -> Self {
        if err.is_disconnect() {
            return DebuggerError::ProtocolDisconnected;
        }
        match err {
            JdwpError::JdwpErrorCode(code, name) => match code {
                error_codes::INVALID_THREAD | error_codes::THREAD_NOT_SUSPENDED => {
                    DebuggerError::InvalidState(name.to_string())
                }
                error_codes::CLASS_NOT_PREPARED => DebuggerError::ClassNotLoaded(name.to_string()),
                _ => DebuggerError::Vm {
                    code,
                    message: name.to_string(),
                },
            },
            other => DebuggerError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DebuggerError {
    fn from(err: serde_json::Error) -> Self {
        DebuggerError::Config(err.to_string())
    }
}
