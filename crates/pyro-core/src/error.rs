//! Error types for Pyro

use thiserror::Error;

/// Result type for Pyro operations
pub type Result<T> = std::result::Result<T, PyroError>;

/// Pyro error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PyroError {
    /// Malformed source text
    #[error("{line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Identifier not bound in the translating scope
    #[error("{line}:{column}: unknown identifier '{name}'")]
    UnknownIdentifier {
        name: String,
        line: usize,
        column: usize,
    },

    /// Identifier vanished from scope between translation and execution
    #[error("Unbound identifier: {0}")]
    Unbound(String),

    /// Object has no member with that name
    #[error("Unknown member: {object}.{member}")]
    UnknownMember { object: String, member: String },

    /// Value cannot be called
    #[error("Not invocable: {0}")]
    NotInvocable(String),

    /// Operand or argument of the wrong type
    #[error("Type error: {0}")]
    TypeError(String),

    /// Pop from an empty data stack
    #[error("Stack underflow")]
    StackUnderflow,

    /// Wrong number of arguments
    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// `assert` saw a falsy value
    #[error("Assertion failed")]
    AssertionFailed,

    /// Integer division or remainder by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed
    #[error("Integer overflow")]
    Overflow,

    /// Nested invocations exceeded the depth limit
    #[error("Recursion limit of {0} exceeded")]
    RecursionLimit(usize),

    /// Type name not present in the registry
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Registered decoder rejected its fields
    #[error("Cannot decode {type_name}: {message}")]
    Decode { type_name: String, message: String },

    /// Socket could not be bound or listened on
    #[error("Bind error: {0}")]
    BindError(String),

    /// IPC communication error
    #[error("IPC error: {0}")]
    IpcError(String),

    /// Remote is not connected or was never entered
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration could not be read
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl PyroError {
    /// Whether this error came from translating source text
    pub fn is_translation(&self) -> bool {
        matches!(
            self,
            PyroError::Syntax { .. } | PyroError::UnknownIdentifier { .. }
        )
    }

    pub(crate) fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        PyroError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PyroError {
    fn from(err: serde_json::Error) -> Self {
        PyroError::SerializationError(err.to_string())
    }
}
