//! Squire VM runtime surface
//!
//! The embedded side of the Squire binding layer:
//! - Reference counted object heap with generational references
//! - Evaluation stack with 1-based frame-relative addressing
//! - Native closures with arity and type mask checking
//! - Classes, instances and opaque user data with host payloads
//! - Per-VM extension slots for host-side bookkeeping
//!
//! There is no compiler or interpreter here. Values are built and called
//! through the [`Vm`] API only.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod heap;
pub mod object;
pub mod params;
pub mod stack;
pub mod tag;
pub mod value;
pub mod vm;

pub use heap::{Graveyard, Heap, HeapStats};
pub use object::{NativeFn, NativeResult, Payload, Raised, ReleaseHook};
pub use params::{ParamKind, ParamsCheck};
pub use stack::{CallFrame, Stack};
pub use tag::TypeTag;
pub use value::{ObjectRef, Value, ValueType};
pub use vm::{ContextId, Vm, VmOptions, WeakVm};

/// VM errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Stack index outside the current frame
    #[error("Invalid stack index: {0}")]
    InvalidIndex(isize),

    /// Value has the wrong type for the operation
    #[error("Wrong type: expected {expected}, got {got}")]
    WrongType {
        /// What the operation needed
        expected: &'static str,
        /// What it found
        got: &'static str,
    },

    /// Parameter count outside the closure's accepted range
    #[error("Wrong number of parameters: expected {min}..={max}, got {got}")]
    WrongArgumentCount {
        /// Minimum count, receiver included
        min: usize,
        /// Maximum count, receiver included
        max: usize,
        /// Supplied count, receiver included
        got: usize,
    },

    /// Parameter rejected by the type mask
    #[error("Parameter {index} has an invalid type: expected {expected}, got {got}")]
    ParameterType {
        /// Zero-based position, receiver is 0
        index: usize,
        /// Mask kind name
        expected: &'static str,
        /// Dynamic type name of the supplied value
        got: &'static str,
    },

    /// Callee is neither a closure nor a class
    #[error("Value of type {0} is not callable")]
    NotCallable(&'static str),

    /// Nested native calls exceeded the configured depth
    #[error("Call depth exceeded (limit {0})")]
    CallDepthExceeded(usize),

    /// Reference to an object that has been freed
    #[error("Stale object reference")]
    StaleReference,

    /// The VM has been destroyed
    #[error("VM has been destroyed")]
    Destroyed,

    /// Error raised by a native closure
    #[error("{0}")]
    Raised(String),

    /// Malformed arity or type mask
    #[error("Invalid parameter check: {0}")]
    InvalidParamsCheck(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// VM result
pub type VmResult<T> = Result<T, VmError>;
