//! Error types for QuickJS embedding operations
//!
//! Three families share one enum:
//!
//! - engine exceptions drained from the context (`Script`, `Syntax`,
//!   `OutOfMemory`, `StackOverflow`, `Interrupted`),
//! - host callback failures re-surfaced through the engine (`HostCallback`),
//! - contract violations raised before any native call (`Disposed`,
//!   `WrongThread`, `OutOfRange`, `InvalidArgument`, class registry errors).

use thiserror::Error;

/// Result type alias for QuickJS operations
pub type QjsResult<T> = Result<T, QjsError>;

/// Structured error types for QuickJS operations
#[derive(Debug, Error)]
pub enum QjsError {
    /// Operation on a released value wrapper or a destroyed context
    #[error("Use after free: the value or context has been disposed")]
    Disposed,

    /// Native heap touched from a thread other than the runtime's owner
    #[error("Cross-thread operation not valid")]
    WrongThread,

    /// Argument outside its documented range (class id, eval flags, ...)
    #[error("Argument out of range: {what} = {value:#x}")]
    OutOfRange { what: &'static str, value: u64 },

    /// Malformed argument (source buffer, names with interior NUL, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Class {0} is already registered")]
    ClassAlreadyRegistered(u32),

    #[error("Class {0} is not registered")]
    ClassNotRegistered(u32),

    /// JavaScript syntax error during parsing
    #[error("SyntaxError: {message}")]
    Syntax {
        message: String,
        stack: Option<String>,
    },

    /// JavaScript runtime error (throw, TypeError, etc.)
    #[error("{error_type}: {message}")]
    Script {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// Engine heap exhausted or memory limit reached
    #[error("Out of memory")]
    OutOfMemory,

    /// Configured native stack size exceeded
    #[error("Stack overflow")]
    StackOverflow,

    /// Execution cancelled from the interrupt handler; not catchable by script
    #[error("Interrupted")]
    Interrupted,

    /// Host callback failure that travelled through the engine
    #[error("Host callback failed: {message}")]
    HostCallback {
        message: String,
        #[source]
        source: Box<QjsError>,
    },

    /// A host callback panicked
    #[error("Host callback panicked: {0}")]
    Panic(String),

    /// An exception is already pending in the engine
    ///
    /// Returned by the `throw_*` helpers so a callback can propagate it with `?`.
    #[error("JavaScript exception pending")]
    Thrown,

    /// Type conversion error
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Value cannot be represented on the host side
    #[error("Invalid cast: {0}")]
    InvalidCast(String),

    /// Failed to create a runtime or context
    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QjsError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub(crate) fn out_of_range(what: &'static str, value: impl Into<u64>) -> Self {
        Self::OutOfRange {
            what,
            value: value.into(),
        }
    }

    /// Check if this error came from the engine's exception channel
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            Self::Script { .. }
                | Self::Syntax { .. }
                | Self::OutOfMemory
                | Self::StackOverflow
                | Self::Interrupted
                | Self::HostCallback { .. }
        )
    }

    /// Check if this error is a contract violation raised before any native call
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Disposed
                | Self::WrongThread
                | Self::OutOfRange { .. }
                | Self::InvalidArgument(_)
                | Self::ClassAlreadyRegistered(_)
                | Self::ClassNotRegistered(_)
        )
    }

    /// Get the stack trace if available
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::Script { stack, .. } | Self::Syntax { stack, .. } => stack.as_deref(),
            Self::HostCallback { source, .. } => source.stack_trace(),
            _ => None,
        }
    }

    /// Get the JavaScript error type name if available
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::Script { error_type, .. } => Some(error_type),
            Self::Syntax { .. } => Some("SyntaxError"),
            Self::OutOfMemory | Self::StackOverflow | Self::Interrupted => Some("InternalError"),
            _ => None,
        }
    }

    /// Message text suitable for re-throwing inside the engine
    pub fn message(&self) -> String {
        match self {
            Self::Script { message, .. } | Self::Syntax { message, .. } => message.clone(),
            Self::HostCallback { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
