//! Error types for the binding layer

use squire_vm::VmError;

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Binding error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A VM value does not have the host type it was read as
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Argument count outside the accepted range (receiver excluded)
    #[error("Wrong number of arguments: expected {min}..={max}, got {got}")]
    ArityMismatch {
        /// Minimum argument count
        min: usize,
        /// Maximum argument count
        max: usize,
        /// Supplied argument count
        got: usize,
    },

    /// Name, entry or type tag lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registration-time misuse
    #[error("Binding error: {0}")]
    Binding(String),

    /// Error reported by the VM or raised by a callee
    #[error("{0}")]
    Runtime(String),

    /// Host code panicked
    #[error("Function panicked: {0}")]
    Panic(String),
}

impl Error {
    /// Shorthand for [`Error::TypeMismatch`]
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Error for an operation on a handle whose VM is gone
    pub(crate) fn vm_gone() -> Self {
        Error::Runtime("VM has been destroyed".to_string())
    }
}

impl From<VmError> for Error {
    fn from(err: VmError) -> Self {
        match err {
            VmError::WrongType { expected, got } => Error::type_mismatch(expected, got),
            VmError::ParameterType {
                index,
                expected,
                got,
            } => Error::TypeMismatch {
                expected: format!("{} (parameter {})", expected, index),
                got: got.to_string(),
            },
            // The VM counts the receiver; host callers do not.
            VmError::WrongArgumentCount { min, max, got } => Error::ArityMismatch {
                min: min.saturating_sub(1),
                max: max.saturating_sub(1),
                got: got.saturating_sub(1),
            },
            VmError::Raised(message) => Error::Runtime(message),
            other => Error::Runtime(other.to_string()),
        }
    }
}
